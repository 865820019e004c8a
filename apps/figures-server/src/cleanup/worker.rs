//! Cleanup worker
//!
//! Periodically removes stale entries from the upload and output roots.
//! The unit of removal is a request directory (a directory holding no
//! subdirectories) or a loose file. Directories that hold subdirectories
//! are namespaces: the sweep descends into them, and drops them only once
//! they are empty and stale themselves. Anything the active-request
//! registry protects is left alone, however old.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::policy::{CleanupPolicy, CleanupTarget};
use crate::clock::Clock;
use crate::extraction::ActiveRequestRegistry;

/// Non-fatal cleanup failures; logged, never surfaced to clients
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("Failed to list {path}: {source}")]
    List {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to inspect {path}: {source}")]
    Inspect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Scanning,
    Stopped,
}

/// Outcome of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub bytes_freed: u64,
    /// Stale entries kept because a request owns them
    pub skipped_active: usize,
    pub failures: usize,
}

impl CleanupReport {
    fn merge(&mut self, other: CleanupReport) {
        self.removed += other.removed;
        self.bytes_freed += other.bytes_freed;
        self.skipped_active += other.skipped_active;
        self.failures += other.failures;
    }
}

/// Sweeps stale files on a timer
#[derive(Clone)]
pub struct CleanupWorker {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    policy: CleanupPolicy,
    registry: ActiveRequestRegistry,
    clock: Arc<dyn Clock>,
    state: Mutex<WorkerState>,
}

impl CleanupWorker {
    pub fn new(
        policy: CleanupPolicy,
        registry: ActiveRequestRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                policy,
                registry,
                clock,
                state: Mutex::new(WorkerState::Idle),
            }),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.inner.state.lock()
    }

    pub fn policy(&self) -> &CleanupPolicy {
        &self.inner.policy
    }

    fn set_state(&self, state: WorkerState) {
        *self.inner.state.lock() = state;
    }

    /// Run a single pass over every target
    pub async fn run_pass(&self) -> CleanupReport {
        self.set_state(WorkerState::Scanning);

        let mut report = CleanupReport::default();
        for target in &self.inner.policy.targets {
            report.merge(self.sweep(target).await);
        }

        if report.removed > 0 {
            tracing::info!(
                removed = report.removed,
                freed_mb = format!("{:.2}", report.bytes_freed as f64 / (1024.0 * 1024.0)),
                skipped_active = report.skipped_active,
                failures = report.failures,
                "Cleanup pass complete"
            );
        } else {
            tracing::debug!(
                skipped_active = report.skipped_active,
                failures = report.failures,
                "Cleanup pass complete, nothing to remove"
            );
        }

        self.set_state(WorkerState::Idle);
        report
    }

    async fn sweep(&self, target: &CleanupTarget) -> CleanupReport {
        let mut report = CleanupReport::default();

        if !tokio::fs::try_exists(&target.dir).await.unwrap_or(false) {
            tracing::warn!(dir = %target.dir.display(), "Cleanup skipped: directory does not exist");
            return report;
        }

        let retention = chrono::Duration::from_std(target.retention).unwrap_or(chrono::Duration::MAX);
        // Nothing is older than an unrepresentable cutoff
        let Some(cutoff) = self.inner.clock.now().checked_sub_signed(retention) else {
            return report;
        };

        let mut pending = vec![target.dir.clone()];
        let mut namespaces = Vec::new();

        while let Some(dir) = pending.pop() {
            let entries = match list_entries(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::error!(error = %e, "Cleanup failed");
                    report.failures += 1;
                    continue;
                }
            };

            for path in entries {
                match classify(&path).await {
                    Ok(Some(Kind::Namespace)) => {
                        pending.push(path.clone());
                        namespaces.push(path);
                    }
                    Ok(Some(Kind::Leaf)) => self.settle(&path, cutoff, &mut report).await,
                    // Gone since listing
                    Ok(None) => {}
                    Err(e) => {
                        report.failures += 1;
                        tracing::error!(error = %e, "Cleanup entry failed");
                    }
                }
            }
        }

        // Parents are discovered before their children, so reversed is deepest first
        for dir in namespaces.into_iter().rev() {
            match self.prune_namespace(&dir, cutoff).await {
                Ok(true) => {
                    report.removed += 1;
                    tracing::debug!(path = %dir.display(), "Deleted empty namespace");
                }
                Ok(false) => {}
                Err(e) => {
                    report.failures += 1;
                    tracing::error!(error = %e, "Cleanup entry failed");
                }
            }
        }

        report
    }

    async fn settle(&self, path: &Path, cutoff: DateTime<Utc>, report: &mut CleanupReport) {
        match self.consider(path, cutoff).await {
            Ok(Verdict::Removed(bytes)) => {
                report.removed += 1;
                report.bytes_freed += bytes;
                tracing::debug!(path = %path.display(), "Deleted stale entry");
            }
            Ok(Verdict::Active) => report.skipped_active += 1,
            Ok(Verdict::Fresh) => {}
            Err(e) => {
                report.failures += 1;
                tracing::error!(error = %e, "Cleanup entry failed");
            }
        }
    }

    async fn consider(&self, path: &Path, cutoff: DateTime<Utc>) -> Result<Verdict, CleanupError> {
        let owned = path.to_path_buf();
        let (modified, size) = tokio::task::spawn_blocking(move || inspect(&owned))
            .await
            .map_err(|e| CleanupError::Inspect {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })?
            .map_err(|source| CleanupError::Inspect {
                path: path.to_path_buf(),
                source,
            })?;

        if DateTime::<Utc>::from(modified) >= cutoff {
            return Ok(Verdict::Fresh);
        }

        // Checked after inspection so a request that started meanwhile is seen
        if self.inner.registry.is_protected(path) {
            tracing::debug!(path = %path.display(), "Stale entry is in use, keeping it");
            return Ok(Verdict::Active);
        }

        remove(path).await?;
        Ok(Verdict::Removed(size))
    }

    /// Remove a namespace left empty and stale; `false` when it stays
    async fn prune_namespace(&self, dir: &Path, cutoff: DateTime<Utc>) -> Result<bool, CleanupError> {
        let inspect_err = |source| CleanupError::Inspect {
            path: dir.to_path_buf(),
            source,
        };
        let modified = match tokio::fs::symlink_metadata(dir).await {
            Ok(metadata) => metadata.modified().map_err(inspect_err)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(inspect_err(e)),
        };

        if DateTime::<Utc>::from(modified) >= cutoff
            || self.inner.registry.is_protected(dir)
            || has_entries(dir).await
        {
            return Ok(false);
        }

        // Non-recursive: a request that moved in since the check keeps it alive
        let source = match tokio::fs::remove_dir(dir).await {
            Ok(()) => return Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => e,
        };
        if has_entries(dir).await {
            return Ok(false);
        }
        Err(CleanupError::Remove {
            path: dir.to_path_buf(),
            source,
        })
    }

    /// Spawn the periodic loop; the first pass runs immediately
    pub fn start(&self) -> CleanupHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let worker = self.clone();
        let interval_duration = self.inner.policy.scan_interval;

        let task = tokio::spawn(async move {
            tracing::info!(
                interval_secs = interval_duration.as_secs(),
                "Cleanup worker started"
            );
            let mut interval = tokio::time::interval(interval_duration);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        worker.run_pass().await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }

            worker.set_state(WorkerState::Stopped);
            tracing::info!("Cleanup worker stopped");
        });

        CleanupHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

enum Verdict {
    Removed(u64),
    Active,
    Fresh,
}

enum Kind {
    /// Holds subdirectories; swept into, never removed wholesale
    Namespace,
    /// A request directory or a loose file
    Leaf,
}

/// Handle to a running cleanup loop
pub struct CleanupHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CleanupHandle {
    /// Stop the loop, letting an in-progress pass finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Cleanup worker task failed");
        }
    }
}

async fn list_entries(dir: &Path) -> Result<Vec<PathBuf>, CleanupError> {
    let list_err = |source| CleanupError::List {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = Vec::new();
    let mut reader = tokio::fs::read_dir(dir).await.map_err(list_err)?;
    while let Some(entry) = reader.next_entry().await.map_err(list_err)? {
        entries.push(entry.path());
    }
    Ok(entries)
}

/// `None` when the entry disappeared since it was listed
async fn classify(path: &Path) -> Result<Option<Kind>, CleanupError> {
    let owned = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || has_subdirectory(&owned))
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
        .and_then(|r| r);

    match result {
        Ok(true) => Ok(Some(Kind::Namespace)),
        Ok(false) => Ok(Some(Kind::Leaf)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(CleanupError::Inspect {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Whether `path` is a real directory with at least one real subdirectory
fn has_subdirectory(path: &Path) -> std::io::Result<bool> {
    if !std::fs::symlink_metadata(path)?.is_dir() {
        return Ok(false);
    }
    for entry in std::fs::read_dir(path)? {
        if entry?.file_type()?.is_dir() {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn has_entries(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut reader) => matches!(reader.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}

/// Latest modification time and total size, recursing into directories
fn inspect(path: &Path) -> std::io::Result<(SystemTime, u64)> {
    let metadata = std::fs::symlink_metadata(path)?;
    let mut latest = metadata.modified()?;
    let mut size = metadata.len();

    if metadata.is_dir() {
        size = 0;
        for entry in std::fs::read_dir(path)? {
            let (child_latest, child_size) = inspect(&entry?.path())?;
            latest = latest.max(child_latest);
            size += child_size;
        }
    }

    Ok((latest, size))
}

async fn remove(path: &Path) -> Result<(), CleanupError> {
    let metadata = tokio::fs::symlink_metadata(path)
        .await
        .map_err(|source| CleanupError::Remove {
            path: path.to_path_buf(),
            source,
        })?;

    let result = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };

    result.map_err(|source| CleanupError::Remove {
        path: path.to_path_buf(),
        source,
    })
}
