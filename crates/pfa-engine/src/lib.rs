//! pfa-engine
//!
//! One optimisation cycle, end to end, plus the scheduler that repeats it.
//!
//! - [`run_cycle`] is a pure synchronous function of an immutable
//!   [`CycleInputs`] snapshot. It never touches IO or the clock.
//! - [`Scheduler`] lives outside that function: it fetches bars with a
//!   bounded retry policy, normalises them, snapshots holdings and calls
//!   [`run_cycle`] on a fixed interval.

mod cycle;
mod scheduler;

pub use cycle::{
    run_cycle, CycleDiagnostics, CycleError, CycleInputs, CycleReport, InstrumentData,
};
pub use scheduler::{
    fetch_with_retry, cycle_id, CycleRecord, HoldingsSource, RetryPolicy, Scheduler,
    SchedulerError, DEFAULT_INTERVAL_SECS,
};
