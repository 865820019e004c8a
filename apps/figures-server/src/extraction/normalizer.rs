//! Response normalizer
//!
//! Maps the engine's metadata JSON onto [`ExtractionResult`]. The engine's
//! output has drifted across versions (top-level list vs. an object with a
//! `figures` key, numbers vs. strings for names), so every record is decoded
//! on its own with lenient, defaulted fields.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::types::{ExtractionResult, FigureRef};
use crate::engine::{EngineError, EngineRun};

/// Either metadata layout the engine is known to write
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawMetadata {
    List(Vec<Value>),
    Document {
        #[serde(default)]
        figures: Vec<Value>,
        #[serde(default, rename = "regionless-captions")]
        regionless_captions: Vec<Value>,
    },
}

/// One engine figure record; every field optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFigure {
    #[serde(deserialize_with = "lenient_string")]
    name: Option<String>,
    #[serde(deserialize_with = "lenient_u32")]
    page: Option<u32>,
    #[serde(rename = "figType", deserialize_with = "lenient_string")]
    fig_type: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    caption: Option<String>,
    #[serde(rename = "renderURL", deserialize_with = "lenient_string")]
    render_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FigureKind {
    Figure,
    Table,
}

/// Figures and tables decoded from one metadata file
#[derive(Debug, Default, PartialEq)]
pub struct NormalizedMetadata {
    pub figures: Vec<FigureRef>,
    pub tables: Vec<FigureRef>,
    pub pages: u32,
}

/// Turns engine runs into stable results
#[derive(Debug, Clone)]
pub struct ResponseNormalizer {
    output_root: PathBuf,
}

impl ResponseNormalizer {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    /// Read and normalize the metadata of a finished run
    ///
    /// Only an unreadable or unparsable metadata file is an error.
    pub async fn normalize(
        &self,
        correlation_id: &str,
        run: &EngineRun,
    ) -> Result<ExtractionResult, EngineError> {
        let metadata_file = &run.artifacts.metadata_file;
        let raw = tokio::fs::read(metadata_file).await.map_err(|e| {
            EngineError::MissingOutput(format!(
                "cannot read {}: {}",
                metadata_file.display(),
                e
            ))
        })?;

        let relative_dir = self.relative(&run.artifacts.work_dir);
        let parsed = parse_metadata(&raw, &relative_dir)
            .map_err(|e| EngineError::MissingOutput(format!("invalid metadata: {e}")))?;

        let rendered: BTreeSet<String> = run
            .artifacts
            .images
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        for figure in parsed.figures.iter().chain(parsed.tables.iter()) {
            let name = figure
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !rendered.contains(&name) {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    image = %name,
                    "Metadata references an image the engine did not render"
                );
            }
        }

        let metadata_name = metadata_file.file_name().map(PathBuf::from).unwrap_or_default();

        Ok(ExtractionResult {
            correlation_id: correlation_id.to_string(),
            figures: parsed.figures,
            tables: parsed.tables,
            metadata_file: relative_dir.join(metadata_name),
            pages: parsed.pages,
            elapsed: run.elapsed,
        })
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.output_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.file_name().map(PathBuf::from).unwrap_or_default())
    }
}

/// Decode engine metadata; image paths are placed under `image_dir`
pub fn parse_metadata(raw: &[u8], image_dir: &Path) -> Result<NormalizedMetadata, serde_json::Error> {
    let records = match serde_json::from_slice::<RawMetadata>(raw)? {
        RawMetadata::List(records) => records,
        RawMetadata::Document {
            figures,
            regionless_captions,
        } => {
            if !regionless_captions.is_empty() {
                tracing::debug!(
                    count = regionless_captions.len(),
                    "Ignoring captions without a figure region"
                );
            }
            figures
        }
    };

    let mut normalized = NormalizedMetadata::default();
    let mut pages = BTreeSet::new();

    for (index, record) in records.into_iter().enumerate() {
        let figure: RawFigure = match serde_json::from_value(record) {
            Ok(figure) => figure,
            Err(e) => {
                tracing::warn!(index, error = %e, "Skipping malformed figure record");
                continue;
            }
        };
        pages.insert(figure.page.unwrap_or(0));

        let Some(file_name) = figure.render_url.as_deref().and_then(basename) else {
            continue;
        };
        let kind = match figure.fig_type.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("figure") => FigureKind::Figure,
            Some("table") => FigureKind::Table,
            other => {
                tracing::debug!(index, fig_type = ?other, "Skipping record of unknown type");
                continue;
            }
        };

        let entry = FigureRef {
            path: image_dir.join(file_name),
            name: figure.name,
            page: figure.page,
            caption: figure.caption,
        };
        match kind {
            FigureKind::Figure => normalized.figures.push(entry),
            FigureKind::Table => normalized.tables.push(entry),
        }
    }

    normalized.pages = pages.len() as u32;
    Ok(normalized)
}

/// Last segment of a path or URL, either separator style
fn basename(url: &str) -> Option<&str> {
    url.rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty() && *name != "..")
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}
