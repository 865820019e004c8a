//! HTTP client for a running figures server
//!
//! Used by the `figures-client` binary. Responses deserialize into the
//! same types the server serializes.

use std::io::{Cursor, Write};
use std::path::{Component, Path, PathBuf};

use reqwest::multipart;
use thiserror::Error;

use crate::routes::extract::{BatchResponse, ExtractResponse};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid artifact URL: {0}")]
    InvalidUrl(String),
}

pub struct FiguresClient {
    client: reqwest::Client,
    base_url: String,
}

impl FiguresClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// POST one PDF to `/extract`
    pub async fn extract_file(&self, path: &Path) -> Result<ExtractResponse, ClientError> {
        let data = tokio::fs::read(path).await?;
        let filename = file_name(path);
        let part = multipart::Part::bytes(data)
            .file_name(filename)
            .mime_str("application/pdf")?;
        let form = multipart::Form::new().part("file", part);

        tracing::debug!(path = %path.display(), "Uploading document");
        let response = self
            .client
            .post(format!("{}/extract", self.base_url))
            .multipart(form)
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    /// POST a ZIP archive of PDFs to `/extract_batch`
    pub async fn extract_archive(
        &self,
        archive_name: &str,
        archive: Vec<u8>,
    ) -> Result<BatchResponse, ClientError> {
        let part = multipart::Part::bytes(archive)
            .file_name(archive_name.to_string())
            .mime_str("application/zip")?;
        let form = multipart::Form::new().part("files", part);

        tracing::debug!(archive = %archive_name, "Uploading batch archive");
        let response = self
            .client
            .post(format!("{}/extract_batch", self.base_url))
            .multipart(form)
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    /// Fetch an artifact by its `/download/...` URL into `output_dir`,
    /// mirroring its path below the server's output root
    pub async fn download(&self, url: &str, output_dir: &Path) -> Result<PathBuf, ClientError> {
        let local = output_dir.join(local_path(url)?);

        let response = self
            .client
            .get(format!("{}{}", self.base_url, url))
            .send()
            .await?;
        let bytes = check(response).await?.bytes().await?;

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&local, &bytes).await?;
        Ok(local)
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(ClientError::Status { status, body })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string())
}

/// Relative local path for a `/download/...` URL
pub fn local_path(url: &str) -> Result<PathBuf, ClientError> {
    let rest = url
        .strip_prefix("/download/")
        .ok_or_else(|| ClientError::InvalidUrl(url.to_string()))?;

    let mut path = PathBuf::new();
    for segment in rest.split('/').filter(|s| !s.is_empty()) {
        let decoded = urlencoding::decode(segment)
            .map_err(|_| ClientError::InvalidUrl(url.to_string()))?;
        let decoded = Path::new(decoded.as_ref());
        match decoded.components().next() {
            Some(Component::Normal(_)) if decoded.components().count() == 1 => path.push(decoded),
            _ => return Err(ClientError::InvalidUrl(url.to_string())),
        }
    }

    if path.as_os_str().is_empty() {
        return Err(ClientError::InvalidUrl(url.to_string()));
    }
    Ok(path)
}

/// ZIP every PDF below `dir`, named relative to it
pub fn zip_directory(dir: &Path) -> Result<Vec<u8>, ClientError> {
    let mut pdfs = Vec::new();
    collect_pdfs(dir, &mut pdfs)?;
    pdfs.sort();

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for path in &pdfs {
        let relative = path.strip_prefix(dir).unwrap_or(path);
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        writer.start_file(name, options)?;
        writer.write_all(&std::fs::read(path)?)?;
    }

    Ok(writer.finish()?.into_inner())
}

fn collect_pdfs(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_pdfs(&path, out)?;
        } else if path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false)
        {
            out.push(path);
        }
    }
    Ok(())
}
