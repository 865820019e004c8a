//! Cleanup policy

use std::path::PathBuf;
use std::time::Duration;

use crate::config::CleanupConfig;

/// One directory the cleanup worker sweeps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupTarget {
    pub dir: PathBuf,
    /// Entries untouched for longer than this are removed
    pub retention: Duration,
}

/// What to sweep and how often; fixed for the life of the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupPolicy {
    pub scan_interval: Duration,
    pub targets: Vec<CleanupTarget>,
}

impl CleanupPolicy {
    /// Uploads and outputs, each with its own retention window
    pub fn from_config(cleanup: &CleanupConfig, upload_root: PathBuf, output_root: PathBuf) -> Self {
        Self {
            scan_interval: cleanup.interval,
            targets: vec![
                CleanupTarget {
                    dir: upload_root,
                    retention: cleanup.upload_retention,
                },
                CleanupTarget {
                    dir: output_root,
                    retention: cleanup.output_retention,
                },
            ],
        }
    }
}
