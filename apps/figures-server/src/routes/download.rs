//! Artifact download route
//!
//! Serves metadata files and rendered images from the output root.

use std::path::{Component, Path as FsPath};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
    routing::get,
    Router,
};

use crate::error::{AppError, Result};
use crate::state::AppState;

/// Create the download router
pub fn router() -> Router<AppState> {
    Router::new().route("/download/*path", get(download))
}

/// GET /download/*path
async fn download(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response> {
    let file = resolve(state.output_root(), &path).await?;

    let data = tokio::fs::read(&file).await?;
    let content_type = mime_guess::from_path(&file).first_or_octet_stream();
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    tracing::debug!(path = %path, size = data.len(), "Serving artifact");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(header::CONTENT_LENGTH, data.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{}\"", filename),
        )
        .body(Body::from(data))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Map a requested path onto a regular file inside `root`
///
/// Absolute paths, `..` segments, and anything that resolves (through
/// symlinks) outside the root are reported as not found.
async fn resolve(root: &FsPath, requested: &str) -> Result<std::path::PathBuf> {
    let not_found = || AppError::NotFound(format!("Artifact not found: {requested}"));

    let relative = FsPath::new(requested);
    if requested.is_empty()
        || !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        tracing::warn!(path = %requested, "Rejected download path");
        return Err(not_found());
    }

    let resolved = tokio::fs::canonicalize(root.join(relative))
        .await
        .map_err(|_| not_found())?;
    if !resolved.starts_with(root) {
        tracing::warn!(path = %requested, "Download path resolves outside the output root");
        return Err(not_found());
    }

    let metadata = tokio::fs::metadata(&resolved).await.map_err(|_| not_found())?;
    if !metadata.is_file() {
        return Err(not_found());
    }

    Ok(resolved)
}
