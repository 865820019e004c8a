//! Engine invocation types

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// ============================================================================
// Settings
// ============================================================================

/// Static engine settings, derived from [`crate::config::EngineConfig`]
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Program used to start the engine (normally `java`)
    pub program: String,
    pub jar_path: PathBuf,
    /// Used as the child's working directory when it exists
    pub working_dir: PathBuf,
    pub dpi: u32,
    /// Extra JVM options, whitespace separated
    pub java_opts: String,
    /// Wall-clock budget for one engine run
    pub timeout: Duration,
    pub retain_failed_output: bool,
}

impl From<&crate::config::EngineConfig> for EngineSettings {
    fn from(config: &crate::config::EngineConfig) -> Self {
        Self {
            program: "java".to_string(),
            jar_path: config.jar_path.clone(),
            working_dir: config.working_dir.clone(),
            dpi: config.dpi,
            java_opts: config.java_opts.clone(),
            timeout: config.timeout,
            retain_failed_output: config.retain_failed_output,
        }
    }
}

// ============================================================================
// Process output
// ============================================================================

/// What a finished child process left behind
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// Exit code; `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Files produced by one engine run
#[derive(Debug, Clone)]
pub struct EngineArtifacts {
    /// The per-request work directory
    pub work_dir: PathBuf,
    /// `<document stem>.json`
    pub metadata_file: PathBuf,
    /// Rendered figure/table images, sorted by file name
    pub images: Vec<PathBuf>,
}

/// Successful engine run
#[derive(Debug, Clone)]
pub struct EngineRun {
    pub output: ProcessOutput,
    pub artifacts: EngineArtifacts,
    pub elapsed: Duration,
}

// ============================================================================
// Errors
// ============================================================================

/// Engine execution failures
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine binary could not be started
    #[error("Failed to launch engine: {0}")]
    Launch(String),

    /// The engine exceeded its wall-clock budget and was killed
    #[error("Engine timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    /// The engine exited with a failure status
    #[error("Engine exited with status {}: {stderr}", code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    NonZeroExit { code: Option<i32>, stderr: String },

    /// The engine exited cleanly but its required output is absent or unreadable
    #[error("Engine output missing: {0}")]
    MissingOutput(String),

    /// Preparing the work directory failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Timeout(_))
    }
}
