//! Engine Module
//!
//! Wraps the external pdffigures2 engine (a JVM process) behind a small,
//! testable surface:
//!
//! - [`EngineCommand`]: command line for one document
//! - [`ProcessLauncher`]: capability to run a command ([`JavaLauncher`] in production)
//! - [`ProcessExecutor`]: work directory, timeout and artifact lookup for one run

mod command;
mod executor;
mod launcher;
mod types;

#[cfg(test)]
pub(crate) mod fake;

pub use command::EngineCommand;
pub use executor::ProcessExecutor;
pub use launcher::{JavaLauncher, ProcessLauncher};
pub use types::{EngineArtifacts, EngineError, EngineRun, EngineSettings, ProcessOutput};
