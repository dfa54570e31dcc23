//
// batch.rs
// neuro-tools
//
// Directory-tree anonymization: every directory under the root becomes one
// parallel task; the files inside a directory are processed sequentially.
//

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use rayon::prelude::*;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::anonymize;
use crate::models::{AnonymizationReport, SkippedFile};

#[derive(Debug, Default)]
struct DirectoryOutcome {
    files_seen: usize,
    files_redacted: usize,
    skipped: Vec<SkippedFile>,
}

/// De-identify every regular file under `root`, in place.
///
/// Unreadable or incomplete files are skipped and reported; one bad file
/// never stops the batch.
pub fn anonymize_directory(root: &Path) -> Result<AnonymizationReport> {
    if !root.is_dir() {
        bail!("{root:?} is not a directory");
    }

    let directories: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect();

    let outcomes: Vec<DirectoryOutcome> = directories
        .par_iter()
        .map(|directory| process_directory(directory))
        .collect();

    let mut report = AnonymizationReport {
        root: root.to_path_buf(),
        directories: directories.len(),
        files_seen: 0,
        files_redacted: 0,
        skipped: Vec::new(),
        completed_at: chrono::Utc::now().to_rfc3339(),
    };
    for outcome in outcomes {
        report.files_seen += outcome.files_seen;
        report.files_redacted += outcome.files_redacted;
        report.skipped.extend(outcome.skipped);
    }
    info!(
        root = %root.display(),
        files = report.files_seen,
        redacted = report.files_redacted,
        skipped = report.skipped.len(),
        "batch finished"
    );
    Ok(report)
}

/// Process the regular files directly inside one directory. The file list
/// is collected up front so staging files from in-flight rewrites are never
/// picked up as inputs.
fn process_directory(directory: &Path) -> DirectoryOutcome {
    let mut outcome = DirectoryOutcome::default();
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(error) => {
            warn!(directory = %directory.display(), %error, "directory is unreadable, skipping");
            return outcome;
        }
    };
    let files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map_or(false, |kind| kind.is_file()))
        .map(|entry| entry.path())
        .collect();

    for path in files {
        outcome.files_seen += 1;
        match anonymize::anonymize_file(&path) {
            Ok(()) => outcome.files_redacted += 1,
            Err(error) => {
                warn!(path = %path.display(), %error, "file skipped");
                outcome.skipped.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }
    outcome
}
