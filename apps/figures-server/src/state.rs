//! Application state management

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cleanup::{CleanupPolicy, CleanupWorker};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::engine::{EngineSettings, ProcessExecutor, ProcessLauncher};
use crate::extraction::{ActiveRequestRegistry, BatchCoordinator, ExtractionInvoker, InvokerSettings};
use crate::gate::RequestGate;

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to prepare directory {path}: {source}")]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    upload_root: PathBuf,
    output_root: PathBuf,
    registry: ActiveRequestRegistry,
    invoker: ExtractionInvoker,
    coordinator: BatchCoordinator,
    gate: RequestGate,
    clock: Arc<dyn Clock>,
}

impl AppState {
    /// Create the state, creating the upload and output roots if needed
    pub fn new(config: Config, launcher: Arc<dyn ProcessLauncher>) -> Result<Self, StateError> {
        Self::with_clock(config, launcher, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: Config,
        launcher: Arc<dyn ProcessLauncher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StateError> {
        let upload_root = prepare_root(&config.storage.upload_dir)?;
        let output_root = prepare_root(&config.storage.output_dir)?;

        let registry = ActiveRequestRegistry::new();
        let executor = ProcessExecutor::new(launcher, EngineSettings::from(&config.engine));
        let invoker = ExtractionInvoker::new(
            executor,
            registry.clone(),
            InvokerSettings {
                upload_root: upload_root.clone(),
                output_root: output_root.clone(),
                allowed_extensions: config.storage.allowed_extensions.clone(),
                max_concurrent: config.limits.worker_pool_size,
                queue_timeout: config.limits.queue_timeout,
            },
        );
        let coordinator = BatchCoordinator::new(invoker.clone(), config.limits.worker_pool_size);
        let gate = RequestGate::new(
            config.limits.rate_limit_requests,
            config.limits.rate_limit_window,
            clock.clone(),
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                upload_root,
                output_root,
                registry,
                invoker,
                coordinator,
                gate,
                clock,
            }),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Canonical upload root
    pub fn upload_root(&self) -> &Path {
        &self.inner.upload_root
    }

    /// Canonical output root
    pub fn output_root(&self) -> &Path {
        &self.inner.output_root
    }

    pub fn registry(&self) -> &ActiveRequestRegistry {
        &self.inner.registry
    }

    pub fn invoker(&self) -> &ExtractionInvoker {
        &self.inner.invoker
    }

    pub fn coordinator(&self) -> &BatchCoordinator {
        &self.inner.coordinator
    }

    pub fn gate(&self) -> &RequestGate {
        &self.inner.gate
    }

    /// Cleanup worker over both roots, sharing this state's registry
    pub fn cleanup_worker(&self) -> CleanupWorker {
        let policy = CleanupPolicy::from_config(
            &self.inner.config.cleanup,
            self.inner.upload_root.clone(),
            self.inner.output_root.clone(),
        );
        CleanupWorker::new(policy, self.inner.registry.clone(), self.inner.clock.clone())
    }
}

fn prepare_root(dir: &Path) -> Result<PathBuf, StateError> {
    let err = |source| StateError::Directory {
        path: dir.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(err)?;
    dir.canonicalize().map_err(err)
}
