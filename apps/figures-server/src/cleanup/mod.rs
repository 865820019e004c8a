//! Cleanup Module
//!
//! Background removal of stale uploads and engine output.

pub mod policy;
pub mod worker;

pub use policy::{CleanupPolicy, CleanupTarget};
pub use worker::{CleanupError, CleanupHandle, CleanupReport, CleanupWorker, WorkerState};
