//! Scheduler
//!
//! Registration, filtering and the execution loop.

mod filter;
mod queue;
mod scheduler;

pub use filter::{Filter, FilterSet};
pub use queue::{BodyFn, BodyQueue};
pub use scheduler::{
    RunStatus, RunnerError, RunnerStats, SuiteOptions, TestOptions, TestRunner,
};
