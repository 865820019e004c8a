//! Input validation
//!
//! Everything here runs before an engine slot is requested; a document that
//! fails validation never reaches the engine.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use tokio::io::AsyncReadExt;

use super::types::ExtractionError;

/// Leading bytes of every PDF file
const PDF_SIGNATURE: &[u8] = b"%PDF-";

/// Check a document before extraction and return its canonical path
pub async fn validate_document(
    document: &Path,
    upload_root: &Path,
    allowed_extensions: &BTreeSet<String>,
) -> Result<PathBuf, ExtractionError> {
    let name = document
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let metadata = tokio::fs::metadata(document)
        .await
        .map_err(|_| ExtractionError::validation(format!("Document not found: {name}")))?;
    if !metadata.is_file() {
        return Err(ExtractionError::validation(format!(
            "Not a regular file: {name}"
        )));
    }

    let extension = document
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if !allowed_extensions.contains(&extension) {
        return Err(ExtractionError::validation(format!(
            "Unsupported file type '{extension}' for {name}"
        )));
    }

    let canonical = tokio::fs::canonicalize(document).await.map_err(|e| {
        ExtractionError::validation(format!("Cannot resolve {name}: {e}"))
    })?;
    let root = tokio::fs::canonicalize(upload_root).await.map_err(|e| {
        ExtractionError::validation(format!("Upload root unavailable: {e}"))
    })?;
    if !canonical.starts_with(&root) {
        return Err(ExtractionError::validation(format!(
            "Document is outside the upload directory: {name}"
        )));
    }

    if extension == "pdf" && !has_pdf_signature(&canonical).await {
        return Err(ExtractionError::validation(format!(
            "Not a valid PDF document: {name}"
        )));
    }

    Ok(canonical)
}

async fn has_pdf_signature(path: &Path) -> bool {
    let mut header = [0u8; PDF_SIGNATURE.len()];
    match tokio::fs::File::open(path).await {
        Ok(mut file) => match file.read_exact(&mut header).await {
            Ok(_) => header == PDF_SIGNATURE,
            Err(_) => false,
        },
        Err(_) => false,
    }
}

/// Parse a client-supplied relative directory (`output_dir`)
///
/// Only plain path segments are accepted; `.` segments are dropped.
pub fn relative_subdir(raw: &str) -> Result<PathBuf, ExtractionError> {
    let raw = raw.trim();
    let mut out = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(segment) => out.push(segment),
            Component::CurDir => {}
            _ => {
                return Err(ExtractionError::validation(format!(
                    "output_dir must be a relative path inside the output directory: {raw}"
                )))
            }
        }
    }
    Ok(out)
}

/// Reduce an uploaded file name to a safe single path segment
///
/// Keeps ASCII alphanumerics, `.`, `-` and `_`; everything else becomes `_`.
/// Returns `None` when nothing usable is left.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        None
    } else {
        Some(cleaned)
    }
}
