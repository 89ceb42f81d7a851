//! pfa-portfolio
//!
//! Mean-Variance Optimizer, Capital Allocator and Recommendation Assembler.
//! - Three-tier optimisation (target return, max Sharpe, equal weight)
//! - Weight-vector constraint checks
//! - Floor + greedy whole-share allocation with cooling exclusion
//! - Recommendation records and portfolio summary
//! - Pure deterministic logic (no IO, no time, no logging)

pub mod allocator;
pub mod assembler;
pub mod constraints;
pub mod optimizer;
pub mod qp;

pub use allocator::{
    cooling_symbols, AllocationCandidate, AllocationDecision, AllocationError, AllocationLine,
    CapitalAllocator,
};
pub use assembler::{
    assemble, portfolio_stats, sharpe_estimate, Assembly, InstrumentPlan, PortfolioStats,
};
pub use constraints::{
    check_weight_bounds, ConstraintViolation, WeightVector, WeightVectorError, BOUND_TOLERANCE,
    SUM_TOLERANCE,
};
pub use optimizer::{
    effective_cap, equal_weights, optimize, OptimizationOutcome, OptimizerError, SolverTier,
    TierAttempt,
};
pub use qp::QpError;
