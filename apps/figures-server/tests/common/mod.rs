//! Shared fixtures for the HTTP suite

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;

use figures_server::clock::ManualClock;
use figures_server::engine::{EngineCommand, EngineError, ProcessLauncher, ProcessOutput};
use figures_server::{router, AppState, Config};

pub const PDF: &[u8] = b"%PDF-1.5\n%fake\n";
const BOUNDARY: &str = "figures-test-boundary";

/// Engine stand-in keyed on the document name:
/// `hang*` never finishes, `bad*` exits 1, anything else yields
/// two figures and one table on one page.
#[derive(Default)]
pub struct ScriptedLauncher {
    calls: AtomicUsize,
}

impl ScriptedLauncher {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn run(&self, command: &EngineCommand) -> Result<ProcessOutput, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stem = command
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        if stem.starts_with("hang") {
            std::future::pending::<()>().await;
        }
        if stem.starts_with("bad") {
            return Ok(ProcessOutput {
                code: Some(1),
                stderr: "java.lang.IllegalStateException: broken document".to_string(),
                ..Default::default()
            });
        }

        let mut records = Vec::new();
        for (kind, count) in [("Figure", 2), ("Table", 1)] {
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
        std::fs::write(
            command.output_dir.join(format!("{stem}.json")),
            serde_json::to_vec(&records).map_err(std::io::Error::from)?,
        )?;

        Ok(ProcessOutput {
            code: Some(0),
            ..Default::default()
        })
    }
}

pub struct TestApp {
    pub temp: TempDir,
    pub state: AppState,
    pub launcher: Arc<ScriptedLauncher>,
    pub clock: ManualClock,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.upload_dir = temp.path().join("uploads");
        config.storage.output_dir = temp.path().join("output");
        config.engine.timeout = Duration::from_millis(300);
        config.limits.worker_pool_size = 2;
        config.limits.queue_timeout = Duration::from_secs(5);
        config.limits.rate_limit_requests = 0;
        config.cleanup.enabled = false;
        tweak(&mut config);

        let launcher = Arc::new(ScriptedLauncher::default());
        let clock = ManualClock::new(Utc::now());
        let state = AppState::with_clock(config, launcher.clone(), Arc::new(clock.clone())).unwrap();

        Self {
            temp,
            state,
            launcher,
            clock,
        }
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    pub fn output_path(&self, relative: &str) -> PathBuf {
        self.state.output_root().join(relative)
    }
}

/// Hand-built multipart body from `(field, filename, data)` parts
pub fn multipart(uri: &str, parts: &[(&str, &str, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    for (field, filename, data) in parts {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
