//
// lib.rs
// neuro-tools
//
// Exposes the crate's modules and re-exports the CLI entry point for both
// binary and library consumers.
//

// Public surface of the library: each module mirrors a CLI verb or shared utility.
pub mod anonymize;
pub mod batch;
pub mod cli;
pub mod convert;
pub mod models;
pub mod polydata;
pub mod tck;
pub mod tractogram;
pub mod trk;
pub mod vtk;
pub mod vtp;

pub use cli::{run as run_cli, Cli, Commands};
