//! Extraction routes
//!
//! - POST /extract - one PDF in multipart field `file`
//! - POST /extract_batch - several PDFs and/or ZIP archives of PDFs
//!
//! Both accept an `output_dir` query parameter naming a namespace below
//! the configured output root.

use std::path::{Component, Path};

use axum::{
    extract::{Multipart, Query, State},
    routing::post,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};

use super::staging::{read_files, UploadStage};
use crate::error::{AppError, Result};
use crate::extraction::validation::relative_subdir;
use crate::extraction::{
    BatchEntry, BatchStats, ExtractionError, ExtractionOptions, ExtractionResult, FigureRef,
    RejectedDocument,
};
use crate::gate::CorrelationId;
use crate::state::AppState;

/// Create the extraction router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/extract", post(extract))
        .route("/extract_batch", post(extract_batch))
}

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ExtractQuery {
    #[serde(default)]
    pub output_dir: Option<String>,
}

impl ExtractQuery {
    fn options(&self) -> Result<ExtractionOptions> {
        let output_dir = match self.output_dir.as_deref() {
            Some(raw) => relative_subdir(raw).map_err(|e| AppError::Validation(e.to_string()))?,
            None => Default::default(),
        };
        Ok(ExtractionOptions { output_dir })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExtractResponse {
    pub correlation_id: String,
    pub num_tables: usize,
    pub num_figures: usize,
    pub metadata_file: String,
    pub pages: u32,
    pub time_ms: u64,
    pub figures: Vec<String>,
    pub tables: Vec<String>,
}

impl From<&ExtractionResult> for ExtractResponse {
    fn from(result: &ExtractionResult) -> Self {
        Self {
            correlation_id: result.correlation_id.clone(),
            num_tables: result.tables.len(),
            num_figures: result.figures.len(),
            metadata_file: artifact_url(&result.metadata_file),
            pages: result.pages,
            time_ms: result.elapsed_ms(),
            figures: urls(&result.figures),
            tables: urls(&result.tables),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchDocument {
    pub filename: String,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_file: Option<String>,
    pub figures: Vec<String>,
    pub tables: Vec<String>,
    pub pages: u32,
    pub time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&BatchEntry> for BatchDocument {
    fn from(entry: &BatchEntry) -> Self {
        match &entry.outcome {
            Ok(result) => Self {
                filename: entry.filename.clone(),
                correlation_id: entry.correlation_id.clone(),
                metadata_file: Some(artifact_url(&result.metadata_file)),
                figures: urls(&result.figures),
                tables: urls(&result.tables),
                pages: result.pages,
                time_ms: result.elapsed_ms(),
                error: None,
            },
            Err(e) => Self {
                filename: entry.filename.clone(),
                correlation_id: entry.correlation_id.clone(),
                metadata_file: None,
                figures: Vec::new(),
                tables: Vec::new(),
                pages: 0,
                time_ms: 0,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total_pages: u64,
    pub total_time_ms: u64,
    pub avg_ms_per_page: f64,
}

impl From<&BatchStats> for ProcessingStats {
    fn from(stats: &BatchStats) -> Self {
        Self {
            total_pages: stats.total_pages,
            total_time_ms: stats.total_time_ms,
            avg_ms_per_page: stats.avg_ms_per_page,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResponse {
    pub correlation_id: String,
    pub num_documents: usize,
    pub documents: Vec<BatchDocument>,
    pub processing_stats: ProcessingStats,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /extract
async fn extract(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    Query(query): Query<ExtractQuery>,
    multipart: Multipart,
) -> Result<Json<ExtractResponse>> {
    let options = query.options()?;

    let upload = read_files(multipart)
        .await?
        .into_iter()
        .find(|f| f.field == "file")
        .ok_or_else(|| AppError::Validation("No file provided. Use field name 'file'".into()))?;

    let stage = UploadStage::create(&state, &correlation_id).await?;
    let document = stage.save(&upload.filename, &upload.data).await?;

    tracing::info!(
        correlation_id = %correlation_id,
        filename = %upload.filename,
        size = upload.data.len(),
        "Extraction requested"
    );

    let result = state
        .invoker()
        .invoke(correlation_id.as_str(), &document, options)
        .await
        .map_err(|e| AppError::extraction(correlation_id.as_str(), e))?;

    Ok(Json(ExtractResponse::from(&result)))
}

/// POST /extract_batch
async fn extract_batch(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    Query(query): Query<ExtractQuery>,
    multipart: Multipart,
) -> Result<Json<BatchResponse>> {
    let options = query.options()?;
    let files = read_files(multipart).await?;
    if files.is_empty() {
        return Err(AppError::Validation("No files provided".into()));
    }

    let stage = UploadStage::create(&state, &correlation_id).await?;
    let mut documents = Vec::new();
    let mut rejected = Vec::new();
    for file in files {
        let is_zip = Path::new(&file.filename)
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("zip"))
            .unwrap_or(false);
        if is_zip {
            documents.extend(stage.unpack_zip(&file.filename, file.data).await?);
        } else {
            // Non-PDF parts are kept so they show up as failed entries
            let saved = stage.save(&file.filename, &file.data).await;
            match saved {
                Ok(path) => documents.push(path),
                Err(AppError::Validation(reason)) => {
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        filename = %file.filename,
                        reason = %reason,
                        "Rejected batch member"
                    );
                    rejected.push(RejectedDocument {
                        filename: file.filename,
                        error: ExtractionError::validation(reason),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    if documents.is_empty() && rejected.is_empty() {
        return Err(AppError::Validation("No PDF documents found in upload".into()));
    }

    let job = state
        .coordinator()
        .run_with_rejected(correlation_id.as_str(), documents, rejected, options)
        .await;

    Ok(Json(BatchResponse {
        correlation_id: job.correlation_id,
        num_documents: job.entries.len(),
        documents: job.entries.iter().map(BatchDocument::from).collect(),
        processing_stats: ProcessingStats::from(&job.stats),
    }))
}

// ============================================================================
// Helpers
// ============================================================================

fn urls(refs: &[FigureRef]) -> Vec<String> {
    refs.iter().map(|r| artifact_url(&r.path)).collect()
}

/// Download URL for a path relative to the output root
pub fn artifact_url(relative: &Path) -> String {
    let mut url = String::from("/download");
    for component in relative.components() {
        if let Component::Normal(segment) = component {
            url.push('/');
            url.push_str(&urlencoding::encode(&segment.to_string_lossy()));
        }
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_artifact_url_encodes_segments() {
        assert_eq!(
            artifact_url(Path::new("team a/req-1/paper-Figure1-1.png")),
            "/download/team%20a/req-1/paper-Figure1-1.png"
        );
    }

    #[test]
    fn test_query_rejects_escaping_output_dir() {
        let query = ExtractQuery {
            output_dir: Some("../elsewhere".into()),
        };
        assert!(matches!(query.options(), Err(AppError::Validation(_))));

        let query = ExtractQuery {
            output_dir: Some("./team-a/run-3".into()),
        };
        assert_eq!(
            query.options().unwrap().output_dir,
            PathBuf::from("team-a/run-3")
        );
    }
}
