//! CLI command handling
//!
//! Dispatches CLI commands and formats output.

use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::{Config, PROGRAM_ENV};
use crate::common::{paths, Error, Result};
use crate::process::program_exists;
use crate::testing::{run_scenario, TestResult};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    let config = Config::load()?;

    match command {
        Commands::Run {
            paths,
            verbose,
            json,
            ..
        } => {
            let mut results: Vec<TestResult> = Vec::with_capacity(paths.len());
            for path in &paths {
                let result = match run_scenario(path, &config, verbose).await {
                    Ok(result) => result,
                    // Scenario could not even be loaded
                    Err(e) => {
                        println!("{} {}: {}", "✗".red(), path.display(), e);
                        TestResult {
                            name: path.display().to_string(),
                            passed: false,
                            steps_run: 0,
                            steps_total: 0,
                            error: Some(e.to_string()),
                        }
                    }
                };
                results.push(result);
            }

            print_summary(&results);
            if json {
                println!("{}", serde_json::to_string_pretty(&results).map_err(|e| {
                    Error::Internal(format!("Failed to serialize results: {}", e))
                })?);
            }

            let failed = results.iter().filter(|r| !r.passed).count();
            if failed > 0 {
                return Err(Error::TestAssertion(format!(
                    "{} of {} scenarios failed",
                    failed,
                    results.len()
                )));
            }
            Ok(())
        }

        Commands::Config => {
            match paths::config_path() {
                Some(path) if path.exists() => println!("Config file: {}", path.display()),
                Some(path) => println!("Config file: {} (not present, using defaults)", path.display()),
                None => println!("Config file: unavailable on this platform"),
            }
            if std::env::var_os(PROGRAM_ENV).is_some() {
                println!("Program overridden by {}", PROGRAM_ENV);
            }

            let program = &config.launcher.program;
            if program_exists(program) {
                println!("Launcher: {} {}", program.display(), "(found)".green());
            } else {
                println!("Launcher: {} {}", program.display(), "(not found)".red());
            }

            println!();
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn print_summary(results: &[TestResult]) {
    if results.len() < 2 {
        return;
    }

    println!("{}", "Summary:".cyan());
    for result in results {
        if result.passed {
            println!("  {} {}", "✓".green(), result.name);
        } else {
            println!(
                "  {} {} ({}/{} steps): {}",
                "✗".red(),
                result.name,
                result.steps_run,
                result.steps_total,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
