//! Extraction Module
//!
//! Orchestration around the engine:
//!
//! - [`ExtractionInvoker`]: one document, with validation and admission control
//! - [`BatchCoordinator`]: many documents, ordered, with partial-failure tolerance
//! - [`ActiveRequestRegistry`]: paths owned by in-flight requests
//! - [`ResponseNormalizer`]: engine metadata to stable results

pub mod batch;
pub mod invoker;
pub mod normalizer;
pub mod registry;
pub mod types;
pub mod validation;

pub use batch::{BatchCoordinator, BatchEntry, BatchJob, BatchStats, RejectedDocument};
pub use invoker::{ExtractionInvoker, InvokerSettings};
pub use normalizer::ResponseNormalizer;
pub use registry::{ActiveRequestRegistry, RegistryGuard};
pub use types::{
    ExtractionError, ExtractionOptions, ExtractionRequest, ExtractionResult, FigureRef,
    RequestStatus,
};
