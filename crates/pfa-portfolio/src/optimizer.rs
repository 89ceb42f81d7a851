//! pfa-portfolio: optimizer
//!
//! Mean-variance optimisation with a three-tier fallback chain:
//!
//! 1. **Target return**: minimum variance subject to Σw = 1, 0 ≤ w ≤ cap and
//!    wᵀμ = target.
//! 2. **Max Sharpe**: maximum wᵀμ / √(wᵀΣw) subject to Σw = 1, 0 ≤ w ≤ cap.
//! 3. **Equal weight**: wᵢ = 1/n. Never fails.
//!
//! The first tier that produces a valid weight vector wins. Every attempt is
//! recorded in the outcome so callers can report which tier was reached.

use serde::{Deserialize, Serialize};

use pfa_risk::CovarianceMatrix;

use crate::constraints::check_weight_bounds;
use crate::qp::{self, LinearConstraint, QpError, QpProblem};

/// Slack on the achievable return range before tier 1 is declared infeasible.
const TARGET_RANGE_SLACK: f64 = 1e-9;

/// Tier 1 result must hit the target return to within this.
const TARGET_TOLERANCE: f64 = 1e-6;

/// Ridge added to 2Σ, scaled by the mean variance.
const RIDGE: f64 = 1e-10;

// ─── Error ───────────────────────────────────────────────────────────────────

/// Why a tier was rejected.
#[derive(Clone, Debug, PartialEq)]
pub enum OptimizerError {
    /// Returns/covariance are inconsistent or non-finite.
    InvalidInput(String),
    /// The target return lies outside what any capped portfolio achieves.
    TargetInfeasible { target: f64, min: f64, max: f64 },
    /// No capped portfolio has a positive expected return.
    NonPositiveReturn { max: f64 },
    /// The QP solver failed.
    Solver(QpError),
    /// The solver result failed post-solve validation.
    Rejected(String),
}

impl std::fmt::Display for OptimizerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(f, "invalid optimizer input: {msg}"),
            Self::TargetInfeasible { target, min, max } => write!(
                f,
                "target return {target:.6} outside achievable range [{min:.6}, {max:.6}]"
            ),
            Self::NonPositiveReturn { max } => {
                write!(f, "no portfolio with positive expected return (max {max:.6})")
            }
            Self::Solver(e) => write!(f, "solver failed: {e}"),
            Self::Rejected(msg) => write!(f, "solution rejected: {msg}"),
        }
    }
}

impl std::error::Error for OptimizerError {}

impl From<QpError> for OptimizerError {
    fn from(e: QpError) -> Self {
        Self::Solver(e)
    }
}

// ─── Outcome ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverTier {
    TargetReturn,
    MaxSharpe,
    EqualWeight,
}

impl SolverTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolverTier::TargetReturn => "target_return",
            SolverTier::MaxSharpe => "max_sharpe",
            SolverTier::EqualWeight => "equal_weight",
        }
    }

    /// Anything past tier 1 is a fallback.
    pub fn is_fallback(&self) -> bool {
        !matches!(self, SolverTier::TargetReturn)
    }
}

impl std::fmt::Display for SolverTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one tier attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TierAttempt {
    pub tier: SolverTier,
    pub accepted: bool,
    /// Rejection reason; `None` when accepted.
    pub reason: Option<String>,
    /// QP iterations, when a solve ran to completion.
    pub iterations: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OptimizationOutcome {
    /// Aligned with the input order.
    pub weights: Vec<f64>,
    pub tier: SolverTier,
    pub attempts: Vec<TierAttempt>,
    /// Cap actually enforced (see [`effective_cap`]).
    pub effective_cap: f64,
    pub cap_relaxed: bool,
}

/// Cap enforced for `n` instruments. When `n × cap < 1` no vector can sum to
/// 1, so the cap is raised to `1/n`; the flag reports that.
pub fn effective_cap(n: usize, cap: f64) -> (f64, bool) {
    let cap = cap.min(1.0);
    if n == 0 {
        return (cap, false);
    }
    let floor = 1.0 / n as f64;
    if (n as f64) * cap < 1.0 - 1e-12 {
        (floor, true)
    } else {
        (cap, false)
    }
}

// ─── Optimizer ───────────────────────────────────────────────────────────────

/// Run the fallback chain. Never fails for `n >= 1`; with `n == 0` the
/// outcome carries no weights.
pub fn optimize(
    expected_returns: &[f64],
    covariance: &CovarianceMatrix,
    target_return: f64,
    cap: f64,
) -> OptimizationOutcome {
    let n = expected_returns.len();
    let (cap, cap_relaxed) = effective_cap(n, cap);
    let mut attempts = Vec::new();

    if n == 0 {
        return OptimizationOutcome {
            weights: Vec::new(),
            tier: SolverTier::EqualWeight,
            attempts,
            effective_cap: cap,
            cap_relaxed,
        };
    }

    let prepared = Prepared::new(expected_returns, covariance, cap);

    let tiers: [(SolverTier, fn(&Prepared, f64) -> TierResult); 2] = [
        (SolverTier::TargetReturn, solve_target_return),
        (SolverTier::MaxSharpe, solve_max_sharpe),
    ];
    for (tier, run) in tiers {
        let result = prepared
            .as_ref()
            .map_err(|e| e.clone())
            .and_then(|p| run(p, target_return));
        match result {
            Ok((weights, iterations)) => {
                attempts.push(TierAttempt {
                    tier,
                    accepted: true,
                    reason: None,
                    iterations: Some(iterations),
                });
                return OptimizationOutcome {
                    weights,
                    tier,
                    attempts,
                    effective_cap: cap,
                    cap_relaxed,
                };
            }
            Err(e) => attempts.push(TierAttempt {
                tier,
                accepted: false,
                reason: Some(e.to_string()),
                iterations: None,
            }),
        }
    }

    attempts.push(TierAttempt {
        tier: SolverTier::EqualWeight,
        accepted: true,
        reason: None,
        iterations: None,
    });
    OptimizationOutcome {
        weights: equal_weights(n),
        tier: SolverTier::EqualWeight,
        attempts,
        effective_cap: cap,
        cap_relaxed,
    }
}

pub fn equal_weights(n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    vec![1.0 / n as f64; n]
}

type TierResult = Result<(Vec<f64>, usize), OptimizerError>;

/// Inputs shared by the QP tiers.
struct Prepared {
    mu: Vec<f64>,
    hessian: Vec<Vec<f64>>,
    cap: f64,
    /// Lowest- and highest-return vertices of the capped simplex.
    w_min: Vec<f64>,
    w_max: Vec<f64>,
    r_min: f64,
    r_max: f64,
}

impl Prepared {
    fn new(mu: &[f64], cov: &CovarianceMatrix, cap: f64) -> Result<Self, OptimizerError> {
        let n = mu.len();
        if cov.dim() != n {
            return Err(OptimizerError::InvalidInput(format!(
                "{n} returns but {}x{} covariance",
                cov.dim(),
                cov.dim()
            )));
        }
        if mu.iter().any(|m| !m.is_finite()) {
            return Err(OptimizerError::InvalidInput(
                "non-finite expected return".to_string(),
            ));
        }

        let mean_var = (0..n).map(|i| cov.get(i, i)).sum::<f64>() / n as f64;
        let ridge = RIDGE * mean_var.abs().max(1.0);
        let hessian: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| 2.0 * cov.get(i, j) + if i == j { ridge } else { 0.0 })
                    .collect()
            })
            .collect();

        let w_min = capped_vertex(mu, cap, false);
        let w_max = capped_vertex(mu, cap, true);
        let r_min = qp::dot(mu, &w_min);
        let r_max = qp::dot(mu, &w_max);

        Ok(Self {
            mu: mu.to_vec(),
            hessian,
            cap,
            w_min,
            w_max,
            r_min,
            r_max,
        })
    }

    fn n(&self) -> usize {
        self.mu.len()
    }
}

/// Fill the highest (or lowest) returns first, `cap` at a time, until the
/// weights sum to 1. This is the return-maximising (minimising) vertex of
/// `{Σw = 1, 0 ≤ w ≤ cap}`. Ties keep input order.
fn capped_vertex(mu: &[f64], cap: f64, highest_first: bool) -> Vec<f64> {
    let mut order: Vec<usize> = (0..mu.len()).collect();
    order.sort_by(|&a, &b| {
        let ord = mu[a].total_cmp(&mu[b]);
        if highest_first {
            ord.reverse()
        } else {
            ord
        }
    });
    let mut w = vec![0.0; mu.len()];
    let mut remaining = 1.0_f64;
    for i in order {
        if remaining <= 0.0 {
            break;
        }
        let take = cap.min(remaining);
        w[i] = take;
        remaining -= take;
    }
    w
}

/// Clip tiny bound violations from the solver and renormalise to Σw = 1,
/// then validate.
fn finalize(raw: &[f64], cap: f64) -> Result<Vec<f64>, OptimizerError> {
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(OptimizerError::Rejected("non-finite weight".to_string()));
    }
    let mut w: Vec<f64> = raw.iter().map(|v| v.clamp(0.0, cap)).collect();
    let sum: f64 = w.iter().sum();
    if sum <= 0.0 {
        return Err(OptimizerError::Rejected("weights sum to zero".to_string()));
    }
    for v in &mut w {
        *v /= sum;
    }
    let symbols: Vec<String> = (0..w.len()).map(|i| format!("#{i}")).collect();
    let violations = check_weight_bounds(&symbols, &w, cap);
    if let Some(v) = violations.first() {
        return Err(OptimizerError::Rejected(v.to_string()));
    }
    Ok(w)
}

fn box_constraints(n: usize, cap: f64) -> Vec<LinearConstraint> {
    let mut out = Vec::with_capacity(2 * n);
    for i in 0..n {
        out.push(LinearConstraint::lower_bound(n, i, 0.0));
        out.push(LinearConstraint::upper_bound(n, i, cap));
    }
    out
}

// ─── Tier 1 ──────────────────────────────────────────────────────────────────

fn solve_target_return(p: &Prepared, target: f64) -> TierResult {
    let n = p.n();
    if !target.is_finite()
        || target < p.r_min - TARGET_RANGE_SLACK
        || target > p.r_max + TARGET_RANGE_SLACK
    {
        return Err(OptimizerError::TargetInfeasible {
            target,
            min: p.r_min,
            max: p.r_max,
        });
    }

    let mut equalities = vec![LinearConstraint::new(vec![1.0; n], 1.0)];
    let spread = p.r_max - p.r_min;
    // With (near-)identical returns every feasible vector hits the target, and
    // the return row would be parallel to the budget row.
    let x0 = if spread < 1e-12 {
        p.w_max.clone()
    } else {
        equalities.push(LinearConstraint::new(p.mu.clone(), target));
        let lambda = ((target - p.r_min) / spread).clamp(0.0, 1.0);
        p.w_min
            .iter()
            .zip(&p.w_max)
            .map(|(lo, hi)| (1.0 - lambda) * lo + lambda * hi)
            .collect()
    };

    let problem = QpProblem {
        hessian: p.hessian.clone(),
        linear: vec![0.0; n],
        equalities,
        inequalities: box_constraints(n, p.cap),
    };
    let sol = qp::solve(&problem, &x0)?;
    let w = finalize(&sol.x, p.cap)?;

    let achieved = qp::dot(&w, &p.mu);
    if spread >= 1e-12 && (achieved - target).abs() > TARGET_TOLERANCE {
        return Err(OptimizerError::Rejected(format!(
            "return {achieved:.9} misses target {target:.9}"
        )));
    }
    Ok((w, sol.iterations))
}

// ─── Tier 2 ──────────────────────────────────────────────────────────────────

/// Max Sharpe via the substitution y = κw (κ > 0):
///
/// ```text
///   minimise yᵀΣy  s.t.  μᵀy = 1,  y ≥ 0,  cap·Σy - yᵢ ≥ 0
/// ```
///
/// then w = y / Σy. Requires a capped portfolio with positive return.
fn solve_max_sharpe(p: &Prepared, _target: f64) -> TierResult {
    let n = p.n();
    if p.r_max <= 0.0 {
        return Err(OptimizerError::NonPositiveReturn { max: p.r_max });
    }

    let mut inequalities = Vec::with_capacity(2 * n);
    for i in 0..n {
        inequalities.push(LinearConstraint::lower_bound(n, i, 0.0));
        let mut a = vec![p.cap; n];
        a[i] -= 1.0;
        inequalities.push(LinearConstraint::new(a, 0.0));
    }

    let y0: Vec<f64> = p.w_max.iter().map(|w| w / p.r_max).collect();
    let problem = QpProblem {
        hessian: p.hessian.clone(),
        linear: vec![0.0; n],
        equalities: vec![LinearConstraint::new(p.mu.clone(), 1.0)],
        inequalities,
    };
    let sol = qp::solve(&problem, &y0)?;

    let total: f64 = sol.x.iter().sum();
    if !(total > 0.0) {
        return Err(OptimizerError::Rejected(
            "homogenised solution has no mass".to_string(),
        ));
    }
    let w: Vec<f64> = sol.x.iter().map(|y| y / total).collect();
    Ok((finalize(&w, p.cap)?, sol.iterations))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cov3() -> CovarianceMatrix {
        CovarianceMatrix::from_rows(
            vec!["A".into(), "B".into(), "C".into()],
            vec![
                vec![0.04, 0.006, 0.004],
                vec![0.006, 0.09, 0.01],
                vec![0.004, 0.01, 0.16],
            ],
        )
        .unwrap()
    }

    const MU3: [f64; 3] = [0.10, 0.15, 0.20];

    fn assert_valid(w: &[f64], cap: f64) {
        let s: f64 = w.iter().sum();
        assert!((s - 1.0).abs() < 1e-6, "sum {s}");
        for v in w {
            assert!(*v >= -1e-9 && *v <= cap + 1e-9, "weight {v} cap {cap}");
        }
    }

    #[test]
    fn capped_vertices_bracket_returns() {
        let lo = capped_vertex(&MU3, 0.4, false);
        let hi = capped_vertex(&MU3, 0.4, true);
        assert_eq!(&lo[..2], &[0.4, 0.4]);
        assert!((lo[2] - 0.2).abs() < 1e-12);
        assert_eq!(hi[2], 0.4);
        assert!((qp::dot(&MU3, &lo) - 0.14).abs() < 1e-12);
        assert!((qp::dot(&MU3, &hi) - 0.16).abs() < 1e-12);
    }

    #[test]
    fn target_tier_hits_target_with_min_variance() {
        let out = optimize(&MU3, &cov3(), 0.15, 0.4);
        assert_eq!(out.tier, SolverTier::TargetReturn);
        assert_valid(&out.weights, 0.4);
        assert!((qp::dot(&out.weights, &MU3) - 0.15).abs() < 1e-6);
        // Symmetric optimum: w_A = w_C = 0.325397, w_B = 0.349206.
        assert!((out.weights[0] - 0.325_397).abs() < 1e-5);
        assert!((out.weights[1] - 0.349_206).abs() < 1e-5);
        assert_eq!(out.attempts.len(), 1);
    }

    #[test]
    fn impossible_target_falls_back_to_max_sharpe() {
        let out = optimize(&MU3, &cov3(), 5.0, 0.4);
        assert_eq!(out.tier, SolverTier::MaxSharpe);
        assert_valid(&out.weights, 0.4);
        assert!(!out.attempts[0].accepted);
        assert!(out.attempts[0]
            .reason
            .as_deref()
            .unwrap_or_default()
            .contains("outside achievable range"));
        // Cap binds on A; B/C split the rest.
        assert!((out.weights[0] - 0.4).abs() < 1e-9);
        assert!((out.weights[1] - 0.339_394).abs() < 1e-5);
    }

    #[test]
    fn negative_returns_fall_back_to_equal_weight() {
        let cov = CovarianceMatrix::diagonal(vec!["A".into(), "B".into()], &[0.04, 0.09]);
        let out = optimize(&[-0.1, -0.2], &cov, 5.0, 0.6);
        assert_eq!(out.tier, SolverTier::EqualWeight);
        assert_eq!(out.weights, vec![0.5, 0.5]);
        assert_eq!(out.attempts.len(), 3);
        assert!(out.tier.is_fallback());
    }

    #[test]
    fn cap_relaxed_when_unreachable() {
        let cov = CovarianceMatrix::diagonal(vec!["A".into(), "B".into()], &[0.04, 0.09]);
        let out = optimize(&[0.1, 0.2], &cov, 0.15, 0.4);
        assert!(out.cap_relaxed);
        assert!((out.effective_cap - 0.5).abs() < 1e-15);
        assert_eq!(out.tier, SolverTier::TargetReturn);
        assert_valid(&out.weights, 0.5);
    }

    #[test]
    fn identical_returns_drop_return_row() {
        let cov = CovarianceMatrix::diagonal(
            vec!["A".into(), "B".into(), "C".into()],
            &[0.01, 0.04, 0.04],
        );
        let out = optimize(&[0.1, 0.1, 0.1], &cov, 0.1, 1.0);
        assert_eq!(out.tier, SolverTier::TargetReturn);
        // Inverse-variance: 4:1:1.
        assert!((out.weights[0] - 4.0 / 6.0).abs() < 1e-6);
        assert_valid(&out.weights, 1.0);
    }

    #[test]
    fn mismatched_covariance_falls_back() {
        let cov = CovarianceMatrix::diagonal(vec!["A".into()], &[0.04]);
        let out = optimize(&[0.1, 0.2], &cov, 0.15, 1.0);
        assert_eq!(out.tier, SolverTier::EqualWeight);
        assert!(out.attempts[0]
            .reason
            .as_deref()
            .unwrap_or_default()
            .contains("invalid optimizer input"));
    }

    #[test]
    fn single_instrument_takes_everything() {
        let cov = CovarianceMatrix::diagonal(vec!["A".into()], &[0.04]);
        let out = optimize(&[0.1], &cov, 0.1, 0.4);
        assert!(out.cap_relaxed);
        assert_eq!(out.weights.len(), 1);
        assert!((out.weights[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn empty_universe_has_no_weights() {
        let cov = CovarianceMatrix::diagonal(vec![], &[]);
        let out = optimize(&[], &cov, 0.1, 0.4);
        assert!(out.weights.is_empty());
        assert!(out.attempts.is_empty());
    }
}
