//! pfa-portfolio: assembler
//!
//! Pure aggregation of allocator output into the externally consumed
//! recommendation records and portfolio summary. Nothing here can fail:
//! undefined ratios are reported as [`Metric::NotAvailable`].

use pfa_risk::{CovarianceMatrix, PositionLimit};
use pfa_schemas::{Action, Metric, PortfolioSummary, Recommendation};

use crate::allocator::AllocationDecision;

/// Everything the assembler needs to know about one instrument.
#[derive(Clone, Debug, PartialEq)]
pub struct InstrumentPlan {
    pub symbol: String,
    /// `None` for instruments excluded for lack of a usable price.
    pub price: Option<f64>,
    pub weight: f64,
    pub expected_return: f64,
    pub limit: Option<PositionLimit>,
    pub current_shares: u64,
    pub cooling: bool,
    pub degraded: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PortfolioStats {
    pub expected_return: Metric,
    pub volatility: Metric,
}

/// `wᵀμ` and `√(wᵀΣw)`. All slices aligned with the covariance order.
pub fn portfolio_stats(weights: &[f64], mu: &[f64], cov: &CovarianceMatrix) -> PortfolioStats {
    if weights.is_empty() || weights.len() != mu.len() || cov.dim() != weights.len() {
        return PortfolioStats {
            expected_return: Metric::NotAvailable,
            volatility: Metric::NotAvailable,
        };
    }
    let ret: f64 = weights.iter().zip(mu).map(|(w, m)| w * m).sum();
    let var = cov.quadratic_form(weights);
    PortfolioStats {
        expected_return: Metric::from_f64(ret),
        volatility: Metric::from_f64(var.max(0.0).sqrt()),
    }
}

/// `(return - risk_free) / volatility`, or N/A when volatility is zero or
/// anything is non-finite.
pub fn sharpe_estimate(stats: &PortfolioStats, risk_free_rate: f64) -> Metric {
    match (stats.expected_return.value(), stats.volatility.value()) {
        (Some(r), Some(v)) if v > 0.0 && risk_free_rate.is_finite() => {
            Metric::from_f64((r - risk_free_rate) / v)
        }
        _ => Metric::NotAvailable,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Assembly {
    pub recommendations: Vec<Recommendation>,
    pub summary: PortfolioSummary,
}

/// One recommendation per plan, in plan order, plus the summary.
pub fn assemble(
    plans: &[InstrumentPlan],
    decision: &AllocationDecision,
    stats: PortfolioStats,
    available_capital: f64,
    risk_free_rate: f64,
) -> Assembly {
    let recommendations: Vec<Recommendation> = plans
        .iter()
        .map(|plan| recommend(plan, decision))
        .collect();

    let total_new_investment: f64 = recommendations.iter().map(|r| r.new_investment()).sum();
    let total_risk: f64 = recommendations.iter().map(|r| r.max_risk_amount).sum();
    let capital_utilization = if available_capital > 0.0 {
        Metric::from_f64(total_new_investment / available_capital)
    } else {
        Metric::NotAvailable
    };

    let summary = PortfolioSummary {
        available_capital,
        total_new_investment,
        cash_after_investment: available_capital - total_new_investment,
        total_risk,
        portfolio_expected_return: stats.expected_return,
        portfolio_volatility: stats.volatility,
        portfolio_sharpe_estimate: sharpe_estimate(&stats, risk_free_rate),
        capital_utilization,
    };

    Assembly {
        recommendations,
        summary,
    }
}

fn recommend(plan: &InstrumentPlan, decision: &AllocationDecision) -> Recommendation {
    let line = plan
        .price
        .and_then(|_| decision.line(&plan.symbol));

    let (action, final_shares, shares_delta) = match (plan.cooling, line) {
        (true, _) => (Action::NoActionCooling, plan.current_shares, 0),
        (false, Some(l)) => (l.action, l.final_shares, l.shares_delta),
        (false, None) => (Action::Hold, plan.current_shares, 0),
    };

    let price = plan.price.unwrap_or(0.0);
    let (stop_loss_price, stop_distance, high_risk) = match plan.limit {
        Some(l) => (l.stop_loss_price, l.stop_distance.max(0.0), l.high_risk),
        None => (0.0, 0.0, false),
    };

    Recommendation {
        symbol: plan.symbol.clone(),
        action,
        current_shares: plan.current_shares,
        final_shares,
        shares_delta,
        price,
        weight: plan.weight,
        stop_loss_price,
        max_risk_amount: (plan.current_shares + shares_delta) as f64 * stop_distance,
        expected_annual_gain: shares_delta as f64 * price * plan.expected_return,
        high_risk,
        degraded: plan.degraded,
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AllocationLine;

    fn limit(stop: f64, price: f64) -> PositionLimit {
        PositionLimit {
            stop_loss_price: stop,
            stop_distance: price - stop,
            max_risk_shares: 1000,
            max_allocation_shares: 1000,
            high_risk: false,
        }
    }

    fn plan(sym: &str, price: Option<f64>, mu: f64, held: u64) -> InstrumentPlan {
        InstrumentPlan {
            symbol: sym.to_string(),
            price,
            weight: 0.5,
            expected_return: mu,
            limit: price.map(|p| limit(p - 5.0, p)),
            current_shares: held,
            cooling: false,
            degraded: false,
        }
    }

    fn line(sym: &str, action: Action, held: u64, fin: u64) -> AllocationLine {
        AllocationLine {
            symbol: sym.to_string(),
            action,
            current_shares: held,
            base_shares: fin,
            refined_shares: 0,
            final_shares: fin,
            shares_delta: fin.saturating_sub(held),
        }
    }

    fn decision(lines: Vec<AllocationLine>) -> AllocationDecision {
        AllocationDecision {
            lines,
            remaining_capital: 0.0,
            rounds_used: 0,
            capital_exhausted: false,
        }
    }

    const STATS: PortfolioStats = PortfolioStats {
        expected_return: Metric::Value(0.15),
        volatility: Metric::Value(0.2),
    };

    #[test]
    fn gain_risk_and_summary() {
        let plans = vec![plan("A", Some(100.0), 0.2, 2), plan("B", Some(50.0), 0.1, 0)];
        let d = decision(vec![
            line("A", Action::Buy, 2, 10),
            line("B", Action::Buy, 0, 4),
        ]);
        let out = assemble(&plans, &d, STATS, 1_000.0, 0.05);
        let a = &out.recommendations[0];
        assert_eq!(a.shares_delta, 8);
        assert!((a.expected_annual_gain - 160.0).abs() < 1e-9);
        assert!((a.max_risk_amount - 50.0).abs() < 1e-9);

        let s = &out.summary;
        assert!((s.total_new_investment - 1_000.0).abs() < 1e-9);
        assert!(s.cash_after_investment.abs() < 1e-9);
        assert!((s.total_risk - 70.0).abs() < 1e-9);
        assert_eq!(s.portfolio_sharpe_estimate, Metric::Value((0.15 - 0.05) / 0.2));
        assert_eq!(s.capital_utilization, Metric::Value(1.0));
    }

    #[test]
    fn unpriced_instrument_holds() {
        let plans = vec![plan("X", None, 0.0, 3)];
        let out = assemble(&plans, &decision(vec![]), STATS, 100.0, 0.05);
        let r = &out.recommendations[0];
        assert_eq!(r.action, Action::Hold);
        assert_eq!(r.shares_delta, 0);
        assert_eq!(r.final_shares, 3);
        assert_eq!(r.max_risk_amount, 0.0);
    }

    #[test]
    fn cooling_overrides_line() {
        let mut p = plan("C", Some(10.0), 0.3, 0);
        p.cooling = true;
        let out = assemble(
            &[p],
            &decision(vec![line("C", Action::Buy, 0, 9)]),
            STATS,
            100.0,
            0.05,
        );
        assert_eq!(out.recommendations[0].action, Action::NoActionCooling);
        assert_eq!(out.recommendations[0].shares_delta, 0);
    }

    #[test]
    fn zero_volatility_sharpe_is_na() {
        let stats = PortfolioStats {
            expected_return: Metric::Value(0.1),
            volatility: Metric::Value(0.0),
        };
        let out = assemble(&[], &decision(vec![]), stats, 0.0, 0.05);
        assert_eq!(out.summary.portfolio_sharpe_estimate, Metric::NotAvailable);
        assert_eq!(out.summary.capital_utilization, Metric::NotAvailable);
        assert_eq!(out.summary.portfolio_sharpe_estimate.to_string(), "N/A");
    }

    #[test]
    fn stats_from_weights() {
        let cov = CovarianceMatrix::diagonal(vec!["A".into(), "B".into()], &[0.04, 0.09]);
        let s = portfolio_stats(&[0.5, 0.5], &[0.1, 0.2], &cov);
        assert!((s.expected_return.value().unwrap() - 0.15).abs() < 1e-12);
        let v = s.volatility.value().unwrap();
        assert!((v - (0.25f64 * 0.04 + 0.25 * 0.09).sqrt()).abs() < 1e-12);
        let bad = portfolio_stats(&[1.0], &[0.1, 0.2], &cov);
        assert_eq!(bad.volatility, Metric::NotAvailable);
    }
}
