//! Upload staging
//!
//! Every extraction request gets its own directory under the upload root,
//! named after its correlation ID and registered as active for as long as
//! the stage is alive.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use axum::extract::Multipart;

use crate::error::{AppError, Result};
use crate::extraction::validation::sanitize_filename;
use crate::extraction::RegistryGuard;
use crate::gate::CorrelationId;
use crate::state::AppState;

/// One uploaded part
pub struct UploadedFile {
    pub field: String,
    pub filename: String,
    pub data: Bytes,
}

/// Read every file part of a multipart body
pub async fn read_files(mut multipart: Multipart) -> Result<Vec<UploadedFile>> {
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        let Some(filename) = field.file_name().map(|s| s.to_string()) else {
            tracing::debug!(field = %name, "Ignoring non-file multipart field");
            continue;
        };

        let data = field.bytes().await?;
        tracing::debug!(
            field = %name,
            filename = %filename,
            size = data.len(),
            "Received upload"
        );

        files.push(UploadedFile {
            field: name,
            filename,
            data,
        });
    }

    Ok(files)
}

pub struct UploadStage {
    dir: PathBuf,
    /// Upper bound on the bytes one archive may unpack to
    max_unpacked: u64,
    _registered: RegistryGuard,
}

impl UploadStage {
    pub async fn create(state: &AppState, correlation_id: &CorrelationId) -> Result<Self> {
        let dir = state.upload_root().join(correlation_id.as_str());
        let registered = state.registry().register([dir.clone()]);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            max_unpacked: state.config().storage.max_content_length as u64,
            _registered: registered,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store one document under a sanitized, non-colliding name
    pub async fn save(&self, filename: &str, data: &[u8]) -> Result<PathBuf> {
        let name = sanitize_filename(filename)
            .ok_or_else(|| AppError::Validation(format!("Invalid file name: {filename:?}")))?;
        let path = unique_path(&self.dir, &name);
        tokio::fs::write(&path, data).await?;
        Ok(path)
    }

    /// Unpack the PDFs of a ZIP archive into the stage
    ///
    /// Entries that would land outside the archive root fail the whole
    /// archive, as does unpacking more than the upload size limit;
    /// directories, non-PDF entries and resource forks are skipped.
    pub async fn unpack_zip(&self, archive_name: &str, data: Bytes) -> Result<Vec<PathBuf>> {
        let dir = self.dir.clone();
        let archive_name = archive_name.to_string();
        let limit = self.max_unpacked;
        tokio::task::spawn_blocking(move || unpack_zip_blocking(&archive_name, data, &dir, limit))
            .await
            .map_err(|e| AppError::Internal(format!("Archive task failed: {}", e)))?
    }
}

fn unpack_zip_blocking(
    archive_name: &str,
    data: Bytes,
    dest: &Path,
    limit: u64,
) -> Result<Vec<PathBuf>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data)).map_err(|e| {
        AppError::Validation(format!("Invalid ZIP archive {archive_name}: {e}"))
    })?;

    let mut extracted = Vec::new();
    let mut remaining = limit;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|e| {
            AppError::Validation(format!("Unreadable entry in {archive_name}: {e}"))
        })?;

        let Some(relative) = entry.enclosed_name() else {
            return Err(AppError::Validation(format!(
                "Archive entry escapes the archive root: {}",
                entry.name()
            )));
        };

        if entry.is_dir() || relative.components().any(|c| c.as_os_str() == "__MACOSX") {
            continue;
        }
        let is_pdf = relative
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        if !is_pdf {
            tracing::debug!(entry = %relative.display(), "Skipping non-PDF archive entry");
            continue;
        }

        let Some(name) = relative
            .file_name()
            .and_then(|n| sanitize_filename(&n.to_string_lossy()))
        else {
            continue;
        };

        if entry.size() > remaining {
            return Err(too_large(archive_name, limit));
        }

        // The declared size is not trusted; read at most one byte past the budget
        let path = unique_path(dest, &name);
        let mut out = std::fs::File::create(&path)?;
        let written = std::io::copy(&mut (&mut entry).take(remaining + 1), &mut out)?;
        if written > remaining {
            drop(out);
            std::fs::remove_file(&path)?;
            return Err(too_large(archive_name, limit));
        }
        remaining -= written;
        extracted.push(path);
    }

    tracing::info!(
        archive = %archive_name,
        documents = extracted.len(),
        "Unpacked batch archive"
    );
    Ok(extracted)
}

fn too_large(archive_name: &str, limit: u64) -> AppError {
    AppError::Validation(format!(
        "Archive {archive_name} unpacks to more than {limit} bytes"
    ))
}

/// `dir/name`, or `dir/stem-N.ext` when taken
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    (1..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{stem}-{n}.{ext}")),
            None => dir.join(format!("{stem}-{n}")),
        })
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}
