//! CLI argument parsing for the desa-import-worker binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "desa-import-worker", about = "Village civil-registry import worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Import one spreadsheet synchronously and print the result as JSON
    Import {
        /// Spreadsheet to import (.xlsx, .xls, .ods or .csv)
        #[arg(long)]
        file: PathBuf,
        /// Write to the in-memory store instead of the configured one
        #[arg(long)]
        dry_run: bool,
    },
}
