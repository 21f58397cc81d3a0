//! Cell debugger CLI
//!
//! Runs a Python cell under a kernel debug adapter and lets the user step
//! through it from the terminal.

use clap::Parser;
use cell_debugger::common::logging;
use cell_debugger::{cli, commands::Commands};

#[derive(Parser)]
#[command(name = "cell-debugger", about = "Step through notebook cells over DAP")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let log_guard = logging::init_cli();

    let cli = Cli::parse();

    if let Err(e) = cli::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        // exit() skips destructors; flush the file log first
        drop(log_guard);
        std::process::exit(1);
    }
}
