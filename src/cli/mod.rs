//! Command-line interface for asset-forge.
//!
//! Provides commands for running and inspecting project pipelines,
//! scaffolding projects, and managing sprite batches.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
