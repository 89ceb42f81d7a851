//! One optimisation cycle.
//!
//! Stages run strictly in sequence, each consuming the previous stage's
//! complete output:
//!   1. risk estimates (per instrument, failures isolated as degraded flags)
//!   2. covariance + three-tier optimisation over priced instruments
//!   3. position sizing against available capital
//!   4. cooling exclusion, floor + greedy allocation
//!   5. recommendation assembly
//!
//! Everything the cycle decided is returned in [`CycleDiagnostics`]; the
//! tracing events emitted along the way carry the same facts for operators.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use pfa_config::{ConfigError, EngineConfig};
use pfa_portfolio::{
    assemble, cooling_symbols, optimize, portfolio_stats, AllocationCandidate, AllocationError,
    CapitalAllocator, InstrumentPlan, PortfolioStats, SolverTier, TierAttempt, WeightVector,
    WeightVectorError,
};
use pfa_risk::{
    build_covariance, estimate_instrument, size_position, InstrumentEstimate, PositionLimit,
    SizingParams,
};
use pfa_schemas::{DegradedReason, Metric, OhlcBar, PortfolioSummary, Recommendation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// Market data for one instrument as seen by a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentData {
    pub symbol: String,
    /// Spot price. When absent the last close of `bars` is used.
    pub current_price: Option<f64>,
    /// Daily bars, ascending by `end_ts`.
    pub bars: Vec<OhlcBar>,
}

impl InstrumentData {
    pub fn from_bars(symbol: impl Into<String>, bars: Vec<OhlcBar>) -> Self {
        Self {
            symbol: symbol.into(),
            current_price: None,
            bars,
        }
    }
}

/// Immutable snapshot of everything a cycle reads.
///
/// The sold ledger travels inside `config`. Instruments are looked up by
/// symbol; universe symbols without an entry are treated as having no data.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleInputs {
    pub config: EngineConfig,
    /// Identifies `config` in diagnostics. Empty when not loaded from files.
    pub config_hash: String,
    pub instruments: Vec<InstrumentData>,
    /// Symbol -> shares currently held.
    pub holdings: BTreeMap<String, u64>,
    pub as_of: NaiveDate,
}

// ─── Outputs ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleDiagnostics {
    pub config_hash: String,
    pub as_of: NaiveDate,
    /// Cash plus sale proceeds.
    pub available_capital: f64,
    /// `None` when no instrument had a usable price.
    pub solver_tier: Option<SolverTier>,
    pub solver_attempts: Vec<TierAttempt>,
    pub effective_cap: Option<f64>,
    pub cap_relaxed: bool,
    /// Accepted weight per universe symbol (0 for unpriced instruments).
    pub weights: BTreeMap<String, f64>,
    pub degraded: BTreeMap<String, Vec<DegradedReason>>,
    pub high_risk: Vec<String>,
    pub cooling: Vec<String>,
    pub refine_rounds_used: u32,
    pub capital_exhausted: bool,
}

impl CycleDiagnostics {
    pub fn used_fallback(&self) -> bool {
        self.solver_tier.map(|t| t.is_fallback()).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// One record per universe symbol, in universe order.
    pub recommendations: Vec<Recommendation>,
    pub summary: PortfolioSummary,
    pub diagnostics: CycleDiagnostics,
}

impl CycleReport {
    pub fn recommendation(&self, symbol: &str) -> Option<&Recommendation> {
        self.recommendations.iter().find(|r| r.symbol == symbol)
    }
}

// ─── Error ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum CycleError {
    /// Fatal to the cycle; reported before any computation.
    InvalidConfig(ConfigError),
    /// Optimizer output failed weight-vector validation.
    InvalidWeights(WeightVectorError),
    Allocation(AllocationError),
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfig(e) => write!(f, "{e}"),
            Self::InvalidWeights(e) => write!(f, "CYCLE_INVALID_WEIGHTS: {e}"),
            Self::Allocation(e) => write!(f, "CYCLE_ALLOCATION_FAILED: {e}"),
        }
    }
}

impl std::error::Error for CycleError {}

impl From<ConfigError> for CycleError {
    fn from(e: ConfigError) -> Self {
        Self::InvalidConfig(e)
    }
}

impl CycleError {
    /// Configuration errors end a scheduler loop; the others only fail the
    /// cycle that raised them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidConfig(_))
    }
}

// ─── Cycle ───────────────────────────────────────────────────────────────────

pub fn run_cycle(inputs: &CycleInputs) -> Result<CycleReport, CycleError> {
    let cfg = &inputs.config;
    cfg.validate()?;
    let opt = &cfg.engine;
    let symbols = &cfg.universe.symbols;

    // ── 1. Risk estimates ────────────────────────────────────────────────────
    let estimates: Vec<InstrumentEstimate> = symbols
        .iter()
        .map(|sym| match inputs.instruments.iter().find(|d| &d.symbol == sym) {
            Some(d) => estimate_instrument(sym, &d.bars, d.current_price, opt.default_volatility),
            None => estimate_instrument(sym, &[], None, opt.default_volatility),
        })
        .collect();

    let mut degraded = BTreeMap::new();
    for e in estimates.iter().filter(|e| e.is_degraded()) {
        warn!(symbol = %e.symbol, reasons = ?e.degraded, "instrument estimates degraded");
        degraded.insert(e.symbol.clone(), e.degraded.clone());
    }
    debug!(
        instruments = estimates.len(),
        degraded = degraded.len(),
        "risk estimates ready"
    );

    // ── 2. Optimisation over priced instruments ──────────────────────────────
    let priced: Vec<usize> = (0..estimates.len())
        .filter(|&i| estimates[i].current_price.is_some())
        .collect();
    let priced_estimates: Vec<InstrumentEstimate> =
        priced.iter().map(|&i| estimates[i].clone()).collect();
    let cov = build_covariance(&priced_estimates, opt.default_volatility);
    let mu: Vec<f64> = priced_estimates.iter().map(|e| e.expected_return).collect();

    let mut weights = vec![0.0; symbols.len()];
    let outcome = if priced.is_empty() {
        warn!("no instrument has a usable price; skipping optimisation");
        None
    } else {
        let out = optimize(&mu, &cov, opt.target_return, opt.per_instrument_cap);
        for (k, &i) in priced.iter().enumerate() {
            weights[i] = out.weights[k];
        }
        for a in out.attempts.iter().filter(|a| !a.accepted) {
            warn!(tier = %a.tier, reason = a.reason.as_deref().unwrap_or(""), "solver tier rejected");
        }
        if out.tier.is_fallback() {
            warn!(tier = %out.tier, "optimizer fell back");
        }
        if out.cap_relaxed {
            warn!(
                configured = opt.per_instrument_cap,
                effective = out.effective_cap,
                "per-instrument cap relaxed to 1/n"
            );
        }
        debug!(tier = %out.tier, weights = ?out.weights, "optimisation done");
        Some(out)
    };

    let weight_map = match &outcome {
        Some(out) => WeightVector::new(symbols.clone(), weights.clone(), out.effective_cap)
            .map_err(CycleError::InvalidWeights)?
            .to_map(),
        None => symbols.iter().map(|s| (s.clone(), 0.0)).collect(),
    };

    // ── 3. Sizing ────────────────────────────────────────────────────────────
    let available_capital = cfg.available_capital();
    let params = SizingParams {
        atr_multiplier: opt.atr_multiplier,
        risk_per_trade: opt.risk_per_trade,
    };
    let limits: Vec<Option<PositionLimit>> = estimates
        .iter()
        .zip(&weights)
        .map(|(e, &w)| {
            e.current_price
                .map(|price| size_position(price, e.atr, w, available_capital, params))
        })
        .collect();
    debug!(available_capital, "positions sized");

    // ── 4. Allocation ────────────────────────────────────────────────────────
    let cooling_set = cooling_symbols(&cfg.sold, inputs.as_of, opt.cooling_period_days);
    let held = |sym: &str| inputs.holdings.get(sym).copied().unwrap_or(0);

    let candidates: Vec<AllocationCandidate> = priced
        .iter()
        .filter_map(|&i| {
            let e = &estimates[i];
            Some(AllocationCandidate {
                symbol: e.symbol.clone(),
                price: e.current_price?,
                weight: weights[i],
                limit: limits[i]?,
                current_shares: held(&e.symbol),
                cooling: cooling_set.contains(&e.symbol),
            })
        })
        .collect();
    let position_cap = outcome.as_ref().map(|o| o.effective_cap).unwrap_or(1.0);
    let decision = CapitalAllocator::new(opt.refine_max_rounds)
        .with_position_cap(position_cap)
        .allocate(&candidates, available_capital)
        .map_err(CycleError::Allocation)?;
    if decision.capital_exhausted {
        warn!(available_capital, "capital below every eligible share price");
    }
    debug!(
        rounds = decision.rounds_used,
        remaining = decision.remaining_capital,
        "allocation done"
    );

    // ── 5. Assembly ──────────────────────────────────────────────────────────
    let plans: Vec<InstrumentPlan> = estimates
        .iter()
        .enumerate()
        .map(|(i, e)| InstrumentPlan {
            symbol: e.symbol.clone(),
            price: e.current_price,
            weight: weights[i],
            expected_return: e.expected_return,
            limit: limits[i],
            current_shares: held(&e.symbol),
            cooling: cooling_set.contains(&e.symbol),
            degraded: e.is_degraded(),
        })
        .collect();

    let stats = if priced.is_empty() {
        PortfolioStats {
            expected_return: Metric::NotAvailable,
            volatility: Metric::NotAvailable,
        }
    } else {
        let priced_weights: Vec<f64> = priced.iter().map(|&i| weights[i]).collect();
        portfolio_stats(&priced_weights, &mu, &cov)
    };
    let assembly = assemble(
        &plans,
        &decision,
        stats,
        available_capital,
        opt.risk_free_rate,
    );

    let high_risk: Vec<String> = estimates
        .iter()
        .zip(&limits)
        .filter(|(_, l)| l.map(|l| l.high_risk).unwrap_or(false))
        .map(|(e, _)| e.symbol.clone())
        .collect();
    let cooling: Vec<String> = symbols
        .iter()
        .filter(|s| cooling_set.contains(*s))
        .cloned()
        .collect();

    let diagnostics = CycleDiagnostics {
        config_hash: inputs.config_hash.clone(),
        as_of: inputs.as_of,
        available_capital,
        solver_tier: outcome.as_ref().map(|o| o.tier),
        solver_attempts: outcome
            .as_ref()
            .map(|o| o.attempts.clone())
            .unwrap_or_default(),
        effective_cap: outcome.as_ref().map(|o| o.effective_cap),
        cap_relaxed: outcome.as_ref().map(|o| o.cap_relaxed).unwrap_or(false),
        weights: weight_map,
        degraded,
        high_risk,
        cooling,
        refine_rounds_used: decision.rounds_used,
        capital_exhausted: decision.capital_exhausted,
    };

    Ok(CycleReport {
        recommendations: assembly.recommendations,
        summary: assembly.summary,
        diagnostics,
    })
}

// ─── Tests ────────────────────────────────────────────────────────────────────
