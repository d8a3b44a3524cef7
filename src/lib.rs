//! testrig - Cooperative test-scheduling engine
//!
//! Builds a hierarchical tree of suites and tests from declarative
//! registration calls, narrows it with selection filters, and executes the
//! selected jobs in a single cooperative thread of control with per-test
//! timeouts, lifecycle hooks and an extensible assertion protocol.
//!
//! ## Features
//!
//! - Nested suites with (possibly async) bodies, serialized through a task
//!   queue so sibling declaration order stays deterministic
//! - Selection by explicit only marks, stable path hashes, tags and
//!   free-text matching; skip by option or by hash
//! - Per-test timeout race with panic containment, or raw propagation for
//!   debugging (`notrycatch`)
//! - before/after hooks at suite and test scope
//! - Extensible assertions with negation views and count expectations
//! - Typed event feed for reporting surfaces, console reporter included
//! - Previous-run persistence for "rerun failed"
//!
//! ## Usage
//!
//! ```no_run
//! use testrig::{Config, ConsoleReporter, TestRunner};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let runner = TestRunner::new(Config::default());
//! let reporter = ConsoleReporter::new().attach(&runner);
//!
//! runner.suite("math", |r| async move {
//!     r.test("addition works", |assert| async move {
//!         assert.equal(1 + 1, 2);
//!         Ok(())
//!     })?;
//!     Ok(())
//! })?;
//!
//! runner.start().await?;
//! println!("{}", reporter.summary());
//! # Ok(())
//! # }
//! ```

pub mod assert;
pub mod bus;
pub mod config;
pub mod hooks;
pub mod model;
pub mod report;
pub mod results;
pub mod runner;
pub mod utils;

pub use assert::{
    Assert, AssertRegistry, Assertion, CheckCtx, DuplicateCheck, InfoEntry, InfoLabel,
};
pub use bus::{Bus, Event, EventKind};
pub use config::{Config, ShowDetail};
pub use model::{JobId, SuiteInfo, TestError, TestInfo, TestRecord, TestStatus};
pub use report::{ConsoleReporter, RunSummary};
pub use results::{ResultStore, StoredRun};
pub use runner::{
    Filter, RunStatus, RunnerError, RunnerStats, SuiteOptions, TestOptions, TestRunner,
};
