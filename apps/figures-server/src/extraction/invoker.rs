//! Extraction invoker
//!
//! Single-document entry point: validate, wait for an engine slot, run the
//! engine, normalize. Engine runs are heavyweight JVM processes, so the
//! number in flight is capped by a shared semaphore.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use super::normalizer::ResponseNormalizer;
use super::registry::ActiveRequestRegistry;
use super::types::{
    ExtractionError, ExtractionOptions, ExtractionRequest, ExtractionResult, RequestStatus,
};
use super::validation::validate_document;
use crate::engine::ProcessExecutor;

/// Static invoker settings
#[derive(Debug, Clone)]
pub struct InvokerSettings {
    /// Canonical upload root; documents must resolve inside it
    pub upload_root: PathBuf,
    /// Canonical output root; work directories are created below it
    pub output_root: PathBuf,
    pub allowed_extensions: BTreeSet<String>,
    /// Number of concurrent engine runs
    pub max_concurrent: usize,
    /// How long to wait for a free slot
    pub queue_timeout: Duration,
}

/// Runs single-document extractions
#[derive(Clone)]
pub struct ExtractionInvoker {
    inner: Arc<InvokerInner>,
}

struct InvokerInner {
    executor: ProcessExecutor,
    normalizer: ResponseNormalizer,
    registry: ActiveRequestRegistry,
    slots: Semaphore,
    settings: InvokerSettings,
}

impl ExtractionInvoker {
    pub fn new(
        executor: ProcessExecutor,
        registry: ActiveRequestRegistry,
        settings: InvokerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(InvokerInner {
                executor,
                normalizer: ResponseNormalizer::new(&settings.output_root),
                registry,
                slots: Semaphore::new(settings.max_concurrent),
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &InvokerSettings {
        &self.inner.settings
    }

    pub fn registry(&self) -> &ActiveRequestRegistry {
        &self.inner.registry
    }

    /// Engine slots currently free
    pub fn available_slots(&self) -> usize {
        self.inner.slots.available_permits()
    }

    /// Build a request whose work directory lives under the output root
    pub fn prepare(
        &self,
        correlation_id: impl Into<String>,
        document: impl Into<PathBuf>,
        options: ExtractionOptions,
    ) -> ExtractionRequest {
        let correlation_id = correlation_id.into();
        let output_dir = self
            .inner
            .settings
            .output_root
            .join(&options.output_dir)
            .join(&correlation_id);
        ExtractionRequest::new(correlation_id, document, output_dir, options)
    }

    /// Convenience wrapper around [`prepare`](Self::prepare) + [`execute`](Self::execute)
    pub async fn invoke(
        &self,
        correlation_id: impl Into<String>,
        document: &Path,
        options: ExtractionOptions,
    ) -> Result<ExtractionResult, ExtractionError> {
        let mut request = self.prepare(correlation_id, document, options);
        self.execute(&mut request).await
    }

    /// Run one request to a terminal status
    ///
    /// Dropping the returned future releases the engine slot, kills the
    /// engine and unregisters the request's paths.
    pub async fn execute(
        &self,
        request: &mut ExtractionRequest,
    ) -> Result<ExtractionResult, ExtractionError> {
        let result = self.execute_inner(request).await;
        match &result {
            Ok(extraction) => {
                request.transition(RequestStatus::Succeeded);
                tracing::info!(
                    correlation_id = %request.correlation_id,
                    figures = extraction.figures.len(),
                    tables = extraction.tables.len(),
                    pages = extraction.pages,
                    elapsed_ms = extraction.elapsed_ms(),
                    "Extraction succeeded"
                );
            }
            Err(e) => {
                request.transition(e.status());
                tracing::warn!(
                    correlation_id = %request.correlation_id,
                    document = %request.document.display(),
                    error = %e,
                    "Extraction failed"
                );
            }
        }
        result
    }

    async fn execute_inner(
        &self,
        request: &mut ExtractionRequest,
    ) -> Result<ExtractionResult, ExtractionError> {
        let inner = &self.inner;

        let document = validate_document(
            &request.document,
            &inner.settings.upload_root,
            &inner.settings.allowed_extensions,
        )
        .await?;

        let confined = request.output_dir.starts_with(&inner.settings.output_root)
            && request
                .options
                .output_dir
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !confined {
            return Err(ExtractionError::validation(
                "output directory is outside the output root",
            ));
        }

        let _registered = inner
            .registry
            .register([document.clone(), request.output_dir.clone()]);

        let queue_timeout = inner.settings.queue_timeout;
        let _permit = match tokio::time::timeout(queue_timeout, inner.slots.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(ExtractionError::validation("extraction service is shutting down"))
            }
            Err(_) => {
                return Err(ExtractionError::QueuingTimeout {
                    waited: queue_timeout,
                })
            }
        };

        request.transition(RequestStatus::Running);
        let run = inner
            .executor
            .execute(&request.correlation_id, &document, &request.output_dir)
            .await?;

        let result = inner.normalizer.normalize(&request.correlation_id, &run).await;
        if result.is_err() && !inner.executor.settings().retain_failed_output {
            // The run "succeeded" but produced nothing usable
            if let Err(e) = tokio::fs::remove_dir_all(&request.output_dir).await {
                tracing::warn!(
                    correlation_id = %request.correlation_id,
                    error = %e,
                    "Failed to remove unusable engine output"
                );
            }
        }
        Ok(result?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::parse_extensions;
    use crate::engine::fake::{FakeBehavior, FakeEngine};
    use crate::engine::{EngineError, EngineSettings};
    use tempfile::TempDir;

    pub(crate) struct Fixture {
        pub temp: TempDir,
        pub invoker: ExtractionInvoker,
        pub engine: Arc<FakeEngine>,
    }

    impl Fixture {
        pub fn upload(&self, name: &str, data: &[u8]) -> PathBuf {
            let path = self.invoker.settings().upload_root.join(name);
            std::fs::write(&path, data).unwrap();
            path
        }
    }

    pub(crate) fn fixture(engine: FakeEngine, slots: usize, queue_timeout: Duration) -> Fixture {
        let temp = TempDir::new().unwrap();
        let upload_root = temp.path().join("uploads");
        let output_root = temp.path().join("output");
        std::fs::create_dir_all(&upload_root).unwrap();
        std::fs::create_dir_all(&output_root).unwrap();

        let engine = Arc::new(engine);
        let executor = ProcessExecutor::new(
            engine.clone(),
            EngineSettings {
                program: "java".to_string(),
                jar_path: PathBuf::from("pdffigures2.jar"),
                working_dir: PathBuf::from("/nonexistent"),
                dpi: 300,
                java_opts: String::new(),
                timeout: Duration::from_millis(300),
                retain_failed_output: false,
            },
        );
        let invoker = ExtractionInvoker::new(
            executor,
            ActiveRequestRegistry::new(),
            InvokerSettings {
                upload_root: upload_root.canonicalize().unwrap(),
                output_root: output_root.canonicalize().unwrap(),
                allowed_extensions: parse_extensions("pdf"),
                max_concurrent: slots,
                queue_timeout,
            },
        );

        Fixture {
            temp,
            invoker,
            engine,
        }
    }

    #[tokio::test]
    async fn test_successful_extraction() {
        let fx = fixture(
            FakeEngine::always(FakeBehavior::figures(2, 1)),
            1,
            Duration::from_secs(5),
        );
        let doc = fx.upload("paper.pdf", b"%PDF-1.5\n");

        let mut request = fx.invoker.prepare("req-1", &doc, ExtractionOptions::default());
        let result = fx.invoker.execute(&mut request).await.unwrap();

        assert_eq!(request.status, RequestStatus::Succeeded);
        assert_eq!(result.figures.len(), 2);
        assert_eq!(result.tables.len(), 1);
        assert_eq!(result.pages, 1);
        assert_eq!(result.metadata_file, PathBuf::from("req-1/paper.json"));
        assert_eq!(
            result.figures[0].path,
            PathBuf::from("req-1/paper-Figure1-1.png")
        );
        // Nothing left registered once the request is done
        assert!(fx.invoker.registry().is_empty());
        assert_eq!(fx.invoker.available_slots(), 1);
    }

    #[tokio::test]
    async fn test_non_pdf_never_reaches_engine() {
        let fx = fixture(
            FakeEngine::always(FakeBehavior::figures(1, 0)),
            1,
            Duration::from_secs(5),
        );
        let doc = fx.upload("corrupt.pdf", b"this is not a pdf");

        let err = fx
            .invoker
            .invoke("req-2", &doc, ExtractionOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractionError::Validation(_)));
        assert_eq!(fx.engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_engine_timeout_reports_timed_out() {
        let fx = fixture(FakeEngine::always(FakeBehavior::Hang), 1, Duration::from_secs(5));
        let doc = fx.upload("slow.pdf", b"%PDF-1.5\n");

        let mut request = fx.invoker.prepare("req-3", &doc, ExtractionOptions::default());
        let err = fx.invoker.execute(&mut request).await.unwrap_err();

        assert!(matches!(err, ExtractionError::Engine(EngineError::Timeout(_))));
        assert_eq!(request.status, RequestStatus::TimedOut);
        assert!(!request.output_dir.exists());
        assert!(fx.invoker.registry().is_empty());
        assert_eq!(fx.invoker.available_slots(), 1);
    }

    #[tokio::test]
    async fn test_queuing_timeout_is_distinct() {
        let fx = fixture(FakeEngine::always(FakeBehavior::Hang), 1, Duration::from_millis(50));
        let first = fx.upload("a.pdf", b"%PDF-1.5\n");
        let second = fx.upload("b.pdf", b"%PDF-1.5\n");

        let (a, b) = tokio::join!(
            fx.invoker.invoke("req-a", &first, ExtractionOptions::default()),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                fx.invoker
                    .invoke("req-b", &second, ExtractionOptions::default())
                    .await
            }
        );

        assert!(matches!(a, Err(ExtractionError::Engine(EngineError::Timeout(_)))));
        assert!(matches!(b, Err(ExtractionError::QueuingTimeout { .. })));
        assert_eq!(fx.engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_excess_requests_queue_and_complete() {
        let fx = fixture(
            FakeEngine::always(FakeBehavior::Succeed {
                figures: 1,
                tables: 0,
                delay: Duration::from_millis(30),
            }),
            2,
            Duration::from_secs(10),
        );

        let docs: Vec<PathBuf> = (0..6)
            .map(|i| fx.upload(&format!("doc{i}.pdf"), b"%PDF-1.5\n"))
            .collect();
        let runs = docs.iter().enumerate().map(|(i, doc)| {
            fx.invoker
                .invoke(format!("req-{i}"), doc, ExtractionOptions::default())
        });
        let results = futures::future::join_all(runs).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(fx.engine.calls(), 6);
        assert!(fx.engine.max_running() <= 2);
        assert_eq!(fx.invoker.available_slots(), 2);
    }

    #[tokio::test]
    async fn test_output_namespace() {
        let fx = fixture(
            FakeEngine::always(FakeBehavior::figures(1, 0)),
            1,
            Duration::from_secs(5),
        );
        let doc = fx.upload("paper.pdf", b"%PDF-1.5\n");
        let options = ExtractionOptions {
            output_dir: PathBuf::from("team-a"),
        };

        let result = fx.invoker.invoke("req-ns", &doc, options).await.unwrap();

        assert_eq!(
            result.metadata_file,
            PathBuf::from("team-a/req-ns/paper.json")
        );
        assert!(fx.temp.path().join("output/team-a/req-ns/paper.json").is_file());
    }

    #[tokio::test]
    async fn test_registered_while_running() {
        let fx = fixture(
            FakeEngine::always(FakeBehavior::Succeed {
                figures: 1,
                tables: 0,
                delay: Duration::from_millis(100),
            }),
            1,
            Duration::from_secs(5),
        );
        let doc = fx.upload("paper.pdf", b"%PDF-1.5\n");
        let invoker = fx.invoker.clone();
        let doc_clone = doc.clone();

        let handle = tokio::spawn(async move {
            invoker
                .invoke("req-live", &doc_clone, ExtractionOptions::default())
                .await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(fx.invoker.registry().contains(&doc));
        assert!(fx
            .invoker
            .registry()
            .contains(&fx.invoker.settings().output_root.join("req-live")));

        handle.await.unwrap().unwrap();
        assert!(fx.invoker.registry().is_empty());
    }
}
