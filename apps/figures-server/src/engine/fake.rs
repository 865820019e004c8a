//! In-process stand-in for the engine, used by unit tests

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::command::EngineCommand;
use super::launcher::ProcessLauncher;
use super::types::{EngineError, ProcessOutput};

#[derive(Debug, Clone)]
pub(crate) enum FakeBehavior {
    /// Write metadata plus one image per figure/table, after `delay`
    Succeed {
        figures: usize,
        tables: usize,
        delay: Duration,
    },
    Exit(i32),
    Hang,
    NoMetadata,
}

impl FakeBehavior {
    pub(crate) fn figures(figures: usize, tables: usize) -> Self {
        FakeBehavior::Succeed {
            figures,
            tables,
            delay: Duration::ZERO,
        }
    }
}

type BehaviorFn = Box<dyn Fn(&Path) -> FakeBehavior + Send + Sync>;

pub(crate) struct FakeEngine {
    behavior: BehaviorFn,
    calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeEngine {
    pub(crate) fn new(behavior: impl Fn(&Path) -> FakeBehavior + Send + Sync + 'static) -> Self {
        Self {
            behavior: Box::new(behavior),
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    pub(crate) fn always(behavior: FakeBehavior) -> Self {
        Self::new(move |_| behavior.clone())
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of runs observed in flight at once
    pub(crate) fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

struct Running<'a>(&'a AtomicUsize);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProcessLauncher for FakeEngine {
    async fn run(&self, command: &EngineCommand) -> Result<ProcessOutput, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _running = Running(&self.running);

        match (self.behavior)(&command.input) {
            FakeBehavior::Succeed {
                figures,
                tables,
                delay,
            } => {
                tokio::time::sleep(delay).await;
                write_output(command, figures, tables)?;
                Ok(ProcessOutput {
                    code: Some(0),
                    ..Default::default()
                })
            }
            FakeBehavior::Exit(code) => Ok(ProcessOutput {
                code: Some(code),
                stderr: "fake engine failure".to_string(),
                ..Default::default()
            }),
            FakeBehavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            FakeBehavior::NoMetadata => Ok(ProcessOutput {
                code: Some(0),
                ..Default::default()
            }),
        }
    }
}

/// Write pdffigures2-shaped output for `command.input` into `command.output_dir`
pub(crate) fn write_output(
    command: &EngineCommand,
    figures: usize,
    tables: usize,
) -> std::io::Result<()> {
    let stem = command
        .input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut records = Vec::new();
    for (kind, count) in [("Figure", figures), ("Table", tables)] {
        for i in 1..=count {
            let image = command.output_dir.join(format!("{stem}-{kind}{i}-1.png"));
            std::fs::write(&image, b"\x89PNG\r\n")?;
            records.push(json!({
                "name": i.to_string(),
                "page": 0,
                "figType": kind,
                "caption": format!("{kind} {i}."),
                "renderURL": image.to_string_lossy(),
                "renderDpi": 300,
            }));
        }
    }

    let metadata = command.output_dir.join(format!("{stem}.json"));
    std::fs::write(metadata, serde_json::to_vec(&records)?)?;
    Ok(())
}
