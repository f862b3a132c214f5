//! Test runner implementation
//!
//! Executes YAML scenarios against a live [`Session`]. Steps run strictly
//! in order; a `send` step first registers the wait steps that directly
//! follow it, so the reply to a command can never outrun its expectation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use colored::Colorize;
use regex::Regex;
use serde::Serialize;
use tokio::process::Command as TokioCommand;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::process::{LaunchSpec, Line, OutputChannel};
use crate::session::{Matcher, Pending, Session, SessionOptions};

use super::config::{LineExpectation, LinesExpectation, StreamName, TestScenario, TestStep};

/// Result of a test run
#[derive(Debug, Serialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub steps_run: usize,
    pub steps_total: usize,
    pub error: Option<String>,
}

impl TestResult {
    fn failed(name: &str, steps_run: usize, steps_total: usize, error: String) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            steps_run,
            steps_total,
            error: Some(error),
        }
    }
}

/// A wait step registered ahead of time
enum Registered {
    Line(Pending<Line>),
    Lines(Pending<Vec<Line>>),
}

/// Load and parse a scenario file
pub fn load_scenario(path: &Path) -> Result<TestScenario> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read test scenario '{}': {}",
            path.display(),
            e
        ))
    })?;

    serde_yaml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse test scenario: {}", e)))
}

/// Run a test scenario from a YAML file
pub async fn run_scenario(path: &Path, config: &Config, verbose: bool) -> Result<TestResult> {
    let scenario = load_scenario(path)?;
    let steps_total = scenario.steps.len();

    println!(
        "\n{} {}",
        "Running Test:".blue().bold(),
        scenario.name.white().bold()
    );

    if let Some(desc) = &scenario.description {
        println!("  {}", desc.dimmed());
    }

    // Run setup steps
    if let Some(setup_steps) = &scenario.setup {
        println!("\n{}", "Setup:".cyan());
        for step in setup_steps {
            if verbose {
                println!("  $ {}", step.shell.dimmed());
            }

            let status = TokioCommand::new("sh")
                .arg("-c")
                .arg(&step.shell)
                .current_dir(scenario_dir(path))
                .stdin(Stdio::null())
                .stdout(if verbose {
                    Stdio::inherit()
                } else {
                    Stdio::null()
                })
                .stderr(if verbose {
                    Stdio::inherit()
                } else {
                    Stdio::null()
                })
                .status()
                .await
                .map_err(|e| Error::Config(format!("Setup command failed to execute: {}", e)))?;

            if !status.success() {
                return Ok(TestResult::failed(
                    &scenario.name,
                    0,
                    steps_total,
                    format!(
                        "Setup command '{}' failed with exit code {:?}",
                        step.shell,
                        status.code()
                    ),
                ));
            }
            println!("  {} {}", "✓".green(), step.shell.dimmed());
        }
    }

    let (spec, options) = launch_settings(&scenario, path, config);

    println!("\n{}", "Starting session...".cyan());
    if verbose {
        println!("  Program: {}", spec.program.display().to_string().dimmed());
        println!("  Script: {}", spec.script.display().to_string().dimmed());
    }

    let mut session = match Session::create(spec, options).await {
        Ok(session) => session,
        Err(e) => {
            println!("  {} {}", "✗".red(), e);
            return Ok(TestResult::failed(&scenario.name, 0, steps_total, e.to_string()));
        }
    };
    println!("  {} Session started (pid {:?})", "✓".green(), session.pid());

    // Execute test steps
    println!("\n{}", "Steps:".cyan());

    let mut registered = HashMap::new();
    for (i, step) in scenario.steps.iter().enumerate() {
        let step_num = i + 1;

        if let Err(e) =
            execute_step(&mut session, &scenario.steps, i, &mut registered, verbose).await
        {
            println!("  {} Step {}: {}", "✗".red(), step_num, e);

            // Cleanup: stop the session, cancelling anything registered
            session.quit().await;

            return Ok(TestResult::failed(&scenario.name, step_num, steps_total, e.to_string()));
        }
    }

    // Cleanup: stop the session
    session.quit().await;

    println!(
        "\n{} {}\n",
        "✓".green().bold(),
        "Test Passed".green().bold()
    );

    Ok(TestResult {
        name: scenario.name,
        passed: true,
        steps_run: steps_total,
        steps_total,
        error: None,
    })
}

fn scenario_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// Paths with more than one component are taken relative to the scenario
fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_relative() && path.components().count() > 1 {
        base.join(path)
    } else {
        path.to_path_buf()
    }
}

/// Merge scenario overrides into the configured launcher and session
fn launch_settings(
    scenario: &TestScenario,
    path: &Path,
    config: &Config,
) -> (LaunchSpec, SessionOptions) {
    let base = scenario_dir(path);
    let target = &scenario.target;

    let script = if target.script.is_relative() {
        base.join(&target.script)
    } else {
        target.script.clone()
    };

    let mut spec = LaunchSpec::from_config(&config.launcher, script).working_dir(base);
    if let Some(program) = &target.program {
        spec.program = resolve_relative(base, program);
    }
    if let Some(args) = &target.args {
        spec.args = args.clone();
    }
    if let Some(args) = &target.script_args {
        spec.script_args = args.clone();
    }

    let mut options = SessionOptions::from_config(config);
    if let Some(ms) = scenario.timeout_ms {
        options.default_timeout = Duration::from_millis(ms);
    }
    if let Some(pattern) = &scenario.break_pattern {
        options.break_pattern = pattern.clone();
    }
    if let Some(commands) = &target.startup_commands {
        options.startup_commands = commands.clone();
    }
    if let Some(commands) = &target.quit_commands {
        options.quit_commands = commands.clone();
    }

    (spec, options)
}

/// Register the expectation for a wait-like step
fn register(session: &Session, step: &TestStep) -> Result<Registered> {
    let millis = |ms: &Option<u64>| ms.map(Duration::from_millis);
    match step {
        TestStep::WaitBreak { timeout_ms } => Ok(Registered::Line(match millis(timeout_ms) {
            Some(timeout) => session.wait_break_for(timeout),
            None => session.wait_break(),
        })),
        TestStep::Wait {
            pattern,
            stream,
            timeout_ms,
            ..
        } => {
            let channel = match stream {
                StreamName::Stdout => OutputChannel::Stdout,
                StreamName::Stderr => OutputChannel::Stderr,
            };
            let matcher = Matcher::regex(pattern)?;
            Ok(Registered::Line(session.wait_on(channel, matcher, millis(timeout_ms))))
        }
        TestStep::LinesUntil {
            pattern, timeout_ms, ..
        } => {
            let matcher = Matcher::regex(pattern)?;
            Ok(Registered::Lines(session.lines_until(matcher, millis(timeout_ms))))
        }
        _ => Err(Error::Internal("step does not register a wait".to_string())),
    }
}

/// Execute a single test step
async fn execute_step(
    session: &mut Session,
    steps: &[TestStep],
    index: usize,
    registered: &mut HashMap<usize, Registered>,
    verbose: bool,
) -> Result<()> {
    let step_num = index + 1;
    let step = &steps[index];

    match step {
        TestStep::Send { command } => {
            // Expectations for the reply go in before the command does
            for (offset, next) in steps[index + 1..].iter().enumerate() {
                if !next.is_wait() {
                    break;
                }
                let next_index = index + 1 + offset;
                if !registered.contains_key(&next_index) {
                    registered.insert(next_index, register(session, next)?);
                }
            }
            session.send(command.as_str()).await?;
            println!("  {} Step {}: send {}", "✓".green(), step_num, command.dimmed());
            Ok(())
        }
        TestStep::TimeoutAfter { ms } => {
            session.timeout_after(Duration::from_millis(*ms));
            println!("  {} Step {}: timeout after {}ms", "✓".green(), step_num, ms);
            Ok(())
        }
        TestStep::Quit => {
            session.quit().await;
            println!("  {} Step {}: quit", "✓".green(), step_num);
            Ok(())
        }
        TestStep::WaitBreak { .. } | TestStep::Wait { .. } | TestStep::LinesUntil { .. } => {
            let pending = match registered.remove(&index) {
                Some(pending) => pending,
                None => register(session, step)?,
            };
            match (step, pending) {
                (TestStep::WaitBreak { .. }, Registered::Line(pending)) => {
                    let line = pending.await?;
                    println!("  {} Step {}: break", "✓".green(), step_num);
                    if verbose {
                        println!("      {}", line.text.dimmed());
                    }
                    Ok(())
                }
                (TestStep::Wait { pattern, expect, .. }, Registered::Line(pending)) => {
                    let line = pending.await?;
                    if let Some(exp) = expect {
                        check_line(&line, exp)?;
                    }
                    println!(
                        "  {} Step {}: wait /{}/ → {}",
                        "✓".green(),
                        step_num,
                        pattern,
                        line.text.dimmed()
                    );
                    Ok(())
                }
                (TestStep::LinesUntil { pattern, expect, .. }, Registered::Lines(pending)) => {
                    let lines = pending.await?;
                    if let Some(exp) = expect {
                        check_lines(&lines, exp)?;
                    }
                    println!(
                        "  {} Step {}: lines until /{}/ ({} lines)",
                        "✓".green(),
                        step_num,
                        pattern,
                        lines.len()
                    );
                    if verbose {
                        for line in &lines {
                            println!("      {}", line.text.dimmed());
                        }
                    }
                    Ok(())
                }
                _ => Err(Error::Internal(format!(
                    "step {} registered the wrong kind of wait",
                    step_num
                ))),
            }
        }
    }
}

/// Check a matched line against its expectation
pub fn check_line(line: &Line, expect: &LineExpectation) -> Result<()> {
    if let Some(expected_substr) = &expect.contains {
        if !line.text.contains(expected_substr.as_str()) {
            return Err(Error::TestAssertion(format!(
                "Line '{}' does not contain '{}'",
                line.text, expected_substr
            )));
        }
    }

    if let Some(pattern) = &expect.matches {
        let re = Regex::new(pattern).map_err(|e| Error::invalid_pattern(pattern, &e))?;
        if !re.is_match(&line.text) {
            return Err(Error::TestAssertion(format!(
                "Line '{}' does not match /{}/",
                line.text, pattern
            )));
        }
    }

    Ok(())
}

/// Check collected lines against their expectation
pub fn check_lines(lines: &[Line], expect: &LinesExpectation) -> Result<()> {
    if let Some(min) = expect.count_at_least {
        if lines.len() < min {
            return Err(Error::TestAssertion(format!(
                "Expected at least {} lines, got {}",
                min,
                lines.len()
            )));
        }
    }

    if let Some(needle) = &expect.any_contains {
        if !lines.iter().any(|l| l.text.contains(needle.as_str())) {
            return Err(Error::TestAssertion(format!(
                "No line contains '{}'",
                needle
            )));
        }
    }

    if let Some(needle) = &expect.none_contains {
        if let Some(line) = lines.iter().find(|l| l.text.contains(needle.as_str())) {
            return Err(Error::TestAssertion(format!(
                "Line {} unexpectedly contains '{}': '{}'",
                line.sequence, needle, line.text
            )));
        }
    }

    Ok(())
}
