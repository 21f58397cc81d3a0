//! CLI command definitions
//!
//! Defines the clap commands for the cell debugger CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Debug a Python source file as a single cell
    Run {
        /// Path to the cell source
        file: PathBuf,

        /// Debug adapter to use (default from config: debugpy-adapter)
        #[arg(long)]
        adapter: Option<String>,

        /// Set a breakpoint on a line of the cell before it runs
        /// Can be specified multiple times: --break 3 --break 7
        #[arg(long = "break", short = 'b')]
        breakpoints: Vec<u32>,
    },

    /// Show the configuration file and resolved debug adapters
    Config,
}
