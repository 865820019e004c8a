//! Extraction request/result types

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EngineError;

// ============================================================================
// Request
// ============================================================================

/// Lifecycle of an extraction request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Running => "running",
            RequestStatus::Succeeded => "succeeded",
            RequestStatus::Failed => "failed",
            RequestStatus::TimedOut => "timed-out",
        };
        f.write_str(s)
    }
}

/// Per-request options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionOptions {
    /// Namespace under the output root; empty means the root itself
    pub output_dir: PathBuf,
}

/// One document admitted for extraction
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub correlation_id: String,
    pub document: PathBuf,
    /// Per-request work directory (`<output root>/<output_dir>/<correlation id>`)
    pub output_dir: PathBuf,
    pub options: ExtractionOptions,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

impl ExtractionRequest {
    pub fn new(
        correlation_id: impl Into<String>,
        document: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        options: ExtractionOptions,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            document: document.into(),
            output_dir: output_dir.into(),
            options,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub(crate) fn transition(&mut self, status: RequestStatus) {
        tracing::debug!(
            correlation_id = %self.correlation_id,
            from = %self.status,
            to = %status,
            "Extraction request status change"
        );
        self.status = status;
    }
}

// ============================================================================
// Result
// ============================================================================

/// One rendered figure or table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureRef {
    /// Image path relative to the output root
    pub path: PathBuf,
    /// Engine-assigned figure name ("1", "2a", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// Outcome of one successful extraction
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub correlation_id: String,
    pub figures: Vec<FigureRef>,
    pub tables: Vec<FigureRef>,
    /// Metadata file path relative to the output root
    pub metadata_file: PathBuf,
    pub pages: u32,
    pub elapsed: Duration,
}

impl ExtractionResult {
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Extraction failures, before and during the engine run
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Input rejected before any engine invocation
    #[error("{0}")]
    Validation(String),

    /// No engine slot became free in time
    #[error("Timed out after {} seconds waiting for an engine slot", waited.as_secs())]
    QueuingTimeout { waited: Duration },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ExtractionError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ExtractionError::Validation(msg.into())
    }

    /// Terminal status for a request that failed with this error
    pub fn status(&self) -> RequestStatus {
        match self {
            ExtractionError::Engine(e) if e.is_timeout() => RequestStatus::TimedOut,
            _ => RequestStatus::Failed,
        }
    }
}

/// File name used in responses and for ordering
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
