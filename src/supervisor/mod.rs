//! Encode lifecycle supervisor
//!
//! Guarantees at most one encode run, started and stopped by listener
//! demand:
//!
//! - the first listener starts a run
//! - the last listener leaving stops it
//! - a run that ends while listeners remain is replaced, with a growing
//!   delay if it keeps failing
//!
//! Decisions are made by the pure [`DemandTracker`]; the [`Supervisor`]
//! task carries them out and is the only owner of the decision state.

pub mod control;
pub mod run;
pub mod state;

pub use control::{Demand, DemandLease, Supervisor, SupervisorConfig, SupervisorHandle};
pub use run::{Run, RunExit};
pub use state::{Action, BackoffPolicy, DemandTracker, Phase, RunId, RunOutcome};
