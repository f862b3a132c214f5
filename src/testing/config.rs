//! Test scenario configuration types
//!
//! Defines the data structures for deserializing YAML test scenarios.

use serde::Deserialize;
use std::path::PathBuf;

/// A complete test scenario loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct TestScenario {
    /// Name of the test scenario
    pub name: String,
    /// Optional description of what the test verifies
    pub description: Option<String>,
    /// Optional setup steps to run before the test (e.g., compilation)
    pub setup: Option<Vec<SetupStep>>,
    /// What to launch
    pub target: TargetConfig,
    /// Default wait timeout in milliseconds
    pub timeout_ms: Option<u64>,
    /// Break/ready pattern overriding the configured one
    pub break_pattern: Option<String>,
    /// The sequence of test steps to execute
    pub steps: Vec<TestStep>,
}

/// A setup step that runs before the test
#[derive(Deserialize, Debug)]
pub struct SetupStep {
    /// Shell command to execute
    pub shell: String,
}

/// Configuration for the debug target
#[derive(Deserialize, Debug)]
pub struct TargetConfig {
    /// Script handed to the launcher, relative to the scenario file
    pub script: PathBuf,
    /// Launcher program overriding the configured one
    pub program: Option<PathBuf>,
    /// Launcher arguments placed before the script
    pub args: Option<Vec<String>>,
    /// Arguments placed after the script
    pub script_args: Option<Vec<String>>,
    /// Commands written right after launch
    pub startup_commands: Option<Vec<String>>,
    /// Commands written before the target is terminated
    pub quit_commands: Option<Vec<String>>,
}

/// Output pipe a wait step listens on
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    #[default]
    Stdout,
    Stderr,
}

/// A single test step in the execution flow
#[derive(Deserialize, Debug)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Wait until the target reports it is stopped and ready
    WaitBreak {
        /// Timeout in milliseconds
        timeout_ms: Option<u64>,
    },
    /// Write a debugger command
    Send {
        /// The command text (e.g., "v8 getactivehandles")
        command: String,
    },
    /// Wait for a line matching a regex
    Wait {
        /// Regex tested against each line
        pattern: String,
        /// Which output to watch
        #[serde(default)]
        stream: StreamName,
        /// Timeout in milliseconds
        timeout_ms: Option<u64>,
        /// Assertions on the matched line
        expect: Option<LineExpectation>,
    },
    /// Collect lines until one matches a regex
    LinesUntil {
        /// Regex that ends collection
        pattern: String,
        /// Timeout in milliseconds
        timeout_ms: Option<u64>,
        /// Assertions on the collected lines
        expect: Option<LinesExpectation>,
    },
    /// Change the default timeout for later waits
    TimeoutAfter {
        /// New default in milliseconds
        ms: u64,
    },
    /// Cancel pending waits and stop the target
    Quit,
}

impl TestStep {
    /// Steps that register an expectation
    pub fn is_wait(&self) -> bool {
        matches!(
            self,
            TestStep::WaitBreak { .. } | TestStep::Wait { .. } | TestStep::LinesUntil { .. }
        )
    }
}

/// Expectations for a matched line
#[derive(Deserialize, Debug)]
pub struct LineExpectation {
    /// Substring the line must contain
    pub contains: Option<String>,
    /// Regex the line must match
    pub matches: Option<String>,
}

/// Expectations for a collected run of lines
#[derive(Deserialize, Debug)]
pub struct LinesExpectation {
    /// Minimum number of lines, including the terminating match
    pub count_at_least: Option<usize>,
    /// Some line must contain this
    pub any_contains: Option<String>,
    /// No line may contain this
    pub none_contains: Option<String>,
}
