//! pfa-risk
//!
//! Risk Estimator and Position Sizer.
//!
//! - Per-instrument annualised return/volatility and ATR, with documented
//!   defaults when the history is too short or unusable
//! - Annualised covariance matrix over common return dates
//! - ATR-based stop-loss price and risk/allocation share caps
//!
//! Deterministic, pure logic. No IO, no time, no logging.

mod estimator;
mod sizer;
mod types;

pub use estimator::{build_covariance, daily_returns, estimate_instrument, true_ranges};
pub use sizer::{floor_shares, size_position};
pub use types::*;
