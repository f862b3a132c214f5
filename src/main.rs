//! Debug Harness CLI - run scripted debugger sessions
//!
//! Plays YAML scenarios against a debugger (lldb + node by default):
//! send commands, wait for output, check what came back.

use clap::Parser;
use debug_harness::{cli, commands, common::logging};
use commands::Commands;

#[derive(Parser)]
#[command(name = "debug-harness", about = "Scripted debugger session harness")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Held until exit so the log file is flushed
    let log_guard = logging::init_cli(
        cli.command.verbose(),
        cli.command.log_file().map(|p| p.as_path()),
    );

    if let Err(e) = cli::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        drop(log_guard);
        std::process::exit(1);
    }
}
