//! Process launchers
//!
//! The executor never spawns processes itself; it hands an [`EngineCommand`]
//! to a [`ProcessLauncher`]. Production uses [`JavaLauncher`], tests plug in
//! a fake engine that writes canned output.

use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::command::EngineCommand;
use super::types::{EngineError, ProcessOutput};

/// Capability to run one engine command to completion
///
/// Implementations must stop the underlying process when the returned future
/// is dropped: the executor enforces its timeout (and request cancellation)
/// by dropping the future.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn run(&self, command: &EngineCommand) -> Result<ProcessOutput, EngineError>;
}

/// Launches the real engine as a child process
#[derive(Debug, Default, Clone, Copy)]
pub struct JavaLauncher;

#[async_trait]
impl ProcessLauncher for JavaLauncher {
    async fn run(&self, command: &EngineCommand) -> Result<ProcessOutput, EngineError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                EngineError::Launch(format!("'{}' not found: {}", command.program, e))
            }
            ErrorKind::PermissionDenied => {
                EngineError::Launch(format!("'{}' is not executable: {}", command.program, e))
            }
            _ => EngineError::Launch(e.to_string()),
        })?;

        tracing::debug!(pid = ?child.id(), "Engine process started");

        let output = child.wait_with_output().await?;

        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
