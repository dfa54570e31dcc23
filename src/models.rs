//
// models.rs
// neuro-tools
//
// Serializable outcome types shared by the CLI and the library surface.
//

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Outcome of a single tractogram conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionSummary {
    pub input: PathBuf,
    pub output: PathBuf,
    pub input_format: String,
    pub output_format: String,
    pub streamlines: usize,
    pub points: usize,
    /// Names of the per-point attributes read from the input; containers
    /// that cannot hold them drop them on write.
    pub attributes: Vec<String>,
}

/// One file the anonymizer left untouched, with the reason it was skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Aggregated outcome of one batch anonymization run.
///
/// Every regular file under the root is counted exactly once:
/// `files_seen == files_redacted + skipped.len()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymizationReport {
    pub root: PathBuf,
    pub directories: usize,
    pub files_seen: usize,
    pub files_redacted: usize,
    pub skipped: Vec<SkippedFile>,
    /// RFC 3339 timestamp taken when the batch finished.
    pub completed_at: String,
}
