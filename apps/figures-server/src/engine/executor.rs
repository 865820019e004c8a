//! Process executor
//!
//! Runs one engine invocation inside a fresh work directory, bounded by the
//! engine timeout. The work directory is torn down on every failure path,
//! including when the caller drops the `execute` future mid-run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::time::timeout;

use super::command::EngineCommand;
use super::launcher::ProcessLauncher;
use super::types::{EngineArtifacts, EngineError, EngineRun, EngineSettings};

/// Image extensions the engine renders figures to
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Supervises engine runs
#[derive(Clone)]
pub struct ProcessExecutor {
    launcher: Arc<dyn ProcessLauncher>,
    settings: EngineSettings,
}

impl ProcessExecutor {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, settings: EngineSettings) -> Self {
        Self { launcher, settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run the engine on `input`, writing into `work_dir`
    ///
    /// `work_dir` must not exist yet; it is created here so that two requests
    /// can never share one.
    pub async fn execute(
        &self,
        correlation_id: &str,
        input: &Path,
        work_dir: &Path,
    ) -> Result<EngineRun, EngineError> {
        let guard = WorkDirGuard::create(work_dir).await?;
        let command = EngineCommand::single(&self.settings, input, guard.path());

        tracing::debug!(
            correlation_id = %correlation_id,
            command = %command.display(),
            "Running engine"
        );

        let started = Instant::now();
        let result = match timeout(self.settings.timeout, self.launcher.run(&command)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(self.settings.timeout)),
        };
        let elapsed = started.elapsed();

        let output = match result {
            Ok(output) => output,
            Err(e) => return Err(self.fail(guard, correlation_id, e)),
        };

        if !output.success() {
            tracing::error!(
                correlation_id = %correlation_id,
                code = ?output.code,
                stdout = %output.stdout,
                stderr = %output.stderr,
                "Engine exited with failure"
            );
            let err = EngineError::NonZeroExit {
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            };
            return Err(self.fail(guard, correlation_id, err));
        }

        let artifacts = match locate_artifacts(guard.path(), input).await {
            Ok(artifacts) => artifacts,
            Err(e) => return Err(self.fail(guard, correlation_id, e)),
        };

        tracing::info!(
            correlation_id = %correlation_id,
            elapsed_ms = elapsed.as_millis() as u64,
            images = artifacts.images.len(),
            "Engine run complete"
        );

        guard.keep();
        Ok(EngineRun {
            output,
            artifacts,
            elapsed,
        })
    }

    fn fail(&self, guard: WorkDirGuard, correlation_id: &str, err: EngineError) -> EngineError {
        if self.settings.retain_failed_output {
            tracing::warn!(
                correlation_id = %correlation_id,
                work_dir = %guard.path().display(),
                "Keeping failed engine output for diagnostics"
            );
            guard.keep();
        }
        err
    }
}

/// Find the metadata file and rendered images of a finished run
async fn locate_artifacts(work_dir: &Path, input: &Path) -> Result<EngineArtifacts, EngineError> {
    let stem = input
        .file_stem()
        .ok_or_else(|| EngineError::MissingOutput(format!("no file stem in {}", input.display())))?;

    let mut metadata_name = stem.to_os_string();
    metadata_name.push(".json");
    let metadata_file = work_dir.join(metadata_name);

    if !tokio::fs::try_exists(&metadata_file).await.unwrap_or(false) {
        return Err(EngineError::MissingOutput(format!(
            "metadata file not found: {}",
            metadata_file.display()
        )));
    }

    let mut images = Vec::new();
    let mut entries = tokio::fs::read_dir(work_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false);
        if is_image && entry.file_type().await?.is_file() {
            images.push(path);
        }
    }
    images.sort();

    Ok(EngineArtifacts {
        work_dir: work_dir.to_path_buf(),
        metadata_file,
        images,
    })
}

/// Owns a work directory until told to keep it
struct WorkDirGuard {
    path: PathBuf,
    armed: bool,
}

impl WorkDirGuard {
    async fn create(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::create_dir(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            armed: true,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for WorkDirGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed work directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove work directory"
            ),
        }
    }
}
