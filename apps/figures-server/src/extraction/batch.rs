//! Batch coordinator
//!
//! Fans a set of documents out over the invoker. Documents are processed
//! in file-name order and reported in that same order, whatever order the
//! engine finishes them in. One document failing never aborts the batch.

use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};

use super::invoker::ExtractionInvoker;
use super::types::{display_name, ExtractionError, ExtractionOptions, ExtractionResult};

/// Terminal outcome of one document in a batch
#[derive(Debug)]
pub struct BatchEntry {
    pub filename: String,
    pub document: PathBuf,
    pub correlation_id: String,
    pub outcome: Result<ExtractionResult, ExtractionError>,
}

impl BatchEntry {
    pub fn result(&self) -> Option<&ExtractionResult> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ExtractionError> {
        self.outcome.as_ref().err()
    }
}

/// A batch member refused before it could be staged
#[derive(Debug)]
pub struct RejectedDocument {
    pub filename: String,
    pub error: ExtractionError,
}

enum Member {
    Staged(PathBuf),
    Rejected(RejectedDocument),
}

impl Member {
    fn name(&self) -> String {
        match self {
            Member::Staged(path) => display_name(path),
            Member::Rejected(rejected) => rejected.filename.clone(),
        }
    }

    fn path(&self) -> Option<&Path> {
        match self {
            Member::Staged(path) => Some(path),
            Member::Rejected(_) => None,
        }
    }
}

/// Aggregates over the succeeded documents of a batch
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchStats {
    pub total_pages: u64,
    pub total_time_ms: u64,
    /// Zero when no page was processed
    pub avg_ms_per_page: f64,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchStats {
    pub fn from_entries(entries: &[BatchEntry]) -> Self {
        let mut stats = BatchStats::default();
        for entry in entries {
            match &entry.outcome {
                Ok(result) => {
                    stats.succeeded += 1;
                    stats.total_pages += u64::from(result.pages);
                    stats.total_time_ms += result.elapsed_ms();
                }
                Err(_) => stats.failed += 1,
            }
        }
        if stats.total_pages > 0 {
            stats.avg_ms_per_page = stats.total_time_ms as f64 / stats.total_pages as f64;
        }
        stats
    }
}

/// Result of one batch call
#[derive(Debug)]
pub struct BatchJob {
    pub correlation_id: String,
    pub entries: Vec<BatchEntry>,
    pub stats: BatchStats,
}

/// Drives multi-document extractions
#[derive(Clone)]
pub struct BatchCoordinator {
    invoker: ExtractionInvoker,
    max_parallel: usize,
}

impl BatchCoordinator {
    /// `max_parallel` is normally the engine slot count
    pub fn new(invoker: ExtractionInvoker, max_parallel: usize) -> Self {
        Self {
            invoker,
            max_parallel: max_parallel.max(1),
        }
    }

    pub async fn run(
        &self,
        correlation_id: &str,
        documents: Vec<PathBuf>,
        options: ExtractionOptions,
    ) -> BatchJob {
        self.run_with_rejected(correlation_id, documents, Vec::new(), options)
            .await
    }

    /// Like [`run`](Self::run), with members that failed before staging
    ///
    /// Rejected members take their place in the name order and are
    /// reported as failed entries without reaching the engine.
    pub async fn run_with_rejected(
        &self,
        correlation_id: &str,
        documents: Vec<PathBuf>,
        rejected: Vec<RejectedDocument>,
        options: ExtractionOptions,
    ) -> BatchJob {
        let mut members: Vec<Member> = documents
            .into_iter()
            .map(Member::Staged)
            .chain(rejected.into_iter().map(Member::Rejected))
            .collect();
        members.sort_by(|a, b| {
            a.name()
                .cmp(&b.name())
                .then_with(|| a.path().cmp(&b.path()))
        });

        tracing::info!(
            correlation_id = %correlation_id,
            documents = members.len(),
            max_parallel = self.max_parallel,
            "Starting batch extraction"
        );

        // `buffered` yields in input order regardless of completion order
        let entries: Vec<BatchEntry> = stream::iter(members.into_iter().enumerate())
            .map(|(index, member)| {
                let invoker = self.invoker.clone();
                let options = options.clone();
                let doc_id = format!("{correlation_id}-{index}");
                async move {
                    match member {
                        Member::Staged(document) => {
                            let outcome = invoker.invoke(doc_id.clone(), &document, options).await;
                            BatchEntry {
                                filename: display_name(&document),
                                document,
                                correlation_id: doc_id,
                                outcome,
                            }
                        }
                        Member::Rejected(rejected) => BatchEntry {
                            filename: rejected.filename,
                            document: PathBuf::new(),
                            correlation_id: doc_id,
                            outcome: Err(rejected.error),
                        },
                    }
                }
            })
            .buffered(self.max_parallel)
            .collect()
            .await;

        let stats = BatchStats::from_entries(&entries);

        tracing::info!(
            correlation_id = %correlation_id,
            succeeded = stats.succeeded,
            failed = stats.failed,
            total_pages = stats.total_pages,
            total_time_ms = stats.total_time_ms,
            avg_ms_per_page = stats.avg_ms_per_page,
            "Batch extraction complete"
        );

        BatchJob {
            correlation_id: correlation_id.to_string(),
            entries,
            stats,
        }
    }
}
