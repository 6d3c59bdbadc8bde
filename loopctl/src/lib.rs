//! Headless iteration controller for an external reasoning worker.
//!
//! Two drivers repeatedly invoke the worker, validate its structured reply
//! against a signal contract and decide whether to continue, stop or escalate:
//! the build sequencer walks the task ids of a plan document, the improve loop
//! runs a bounded number of iterations gated on an improvement delta.
//!
//! - **[`core`]**: Pure, deterministic logic (signal validation, plan parsing,
//!   gating, run records). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting services (locks, config tiers, worker process,
//!   archiving, progress log, notifications). Isolated behind traits where the
//!   drivers need fakes.
//! - **[`driver`]**: The two state machines, composed from the services.

pub mod core;
pub mod driver;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
