//! CLI command definitions
//!
//! Defines the clap commands for the harness CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Execute test scenarios defined in YAML files
    Run {
        /// Paths to YAML scenario files
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Verbose output (also raises the log level to debug)
        #[arg(long, short)]
        verbose: bool,

        /// Print a JSON summary of all results
        #[arg(long)]
        json: bool,

        /// Write a full trace log, including every target line, to this file
        #[arg(long)]
        log_file: Option<PathBuf>,
    },

    /// Show the configuration file location and effective settings
    Config,
}

impl Commands {
    pub fn verbose(&self) -> bool {
        matches!(self, Commands::Run { verbose: true, .. })
    }

    pub fn log_file(&self) -> Option<&PathBuf> {
        match self {
            Commands::Run { log_file, .. } => log_file.as_ref(),
            Commands::Config => None,
        }
    }
}
