//
// cli.rs
// neuro-tools
//
// Defines the CLI surface with Clap and dispatches user-selected commands
// to the corresponding modules.
//

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::{batch, convert};

/// Command-line interface glue code: defines the available verbs and
/// dispatches to modules.
#[derive(Parser)]
#[command(name = "neuro-tools")]
#[command(about = "Tractogram conversion and DICOM anonymization", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert a tractogram between .tck, .trk, .vtk and .vtp/.xml containers
    Convert { input: PathBuf, output: PathBuf },
    /// De-identify every DICOM file under a directory tree, in place
    Anonymize {
        directory: PathBuf,
        /// Write the aggregated batch report to this path as JSON
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
}

pub fn run() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Parse the raw CLI arguments once and dispatch to a subcommand handler.
    let cli = Cli::parse();

    match cli.command {
        Commands::Convert { input, output } => {
            let summary = convert::convert(&input, &output)?;
            println!("Converted {:?} -> {:?}", summary.input, summary.output);
            println!(
                "  Format: {} -> {} | Streamlines: {} | Points: {}",
                summary.input_format, summary.output_format, summary.streamlines, summary.points
            );
            if !summary.attributes.is_empty() {
                println!("  Point attributes: {}", summary.attributes.join(", "));
            }
        }
        Commands::Anonymize { directory, report } => {
            let outcome = batch::anonymize_directory(&directory)?;
            println!("Anonymized {:?}", outcome.root);
            println!(
                "  Directories: {} | Files: {} | Redacted: {} | Skipped: {}",
                outcome.directories,
                outcome.files_seen,
                outcome.files_redacted,
                outcome.skipped.len()
            );
            for skipped in outcome.skipped.iter().take(16) {
                println!("  Skipped {:?}: {}", skipped.path, skipped.reason);
            }
            if outcome.skipped.len() > 16 {
                println!("  ... {} more skipped files omitted", outcome.skipped.len() - 16);
            }
            if let Some(path) = report {
                let json = serde_json::to_string_pretty(&outcome)?;
                fs::write(&path, json)
                    .with_context(|| format!("Failed to write report to {path:?}"))?;
                println!("  Report written to {:?}", path);
            }
        }
    }

    Ok(())
}
