//! Error types for the debug harness
//!
//! Error messages are designed to be clear and actionable, with hints on
//! how to resolve common issues when a scenario fails.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the debug harness
#[derive(Error, Debug)]
pub enum Error {
    // === Process Errors ===
    #[error("Failed to launch '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("Failed to write to target: {0}")]
    Write(String),

    #[error("Target process exited{}", exit_suffix(.code))]
    ProcessExited { code: Option<i32> },

    // === Expectation Errors ===
    #[error("Timed out after {}ms waiting for {pattern}", millis(.after))]
    Timeout { pattern: String, after: Duration },

    #[error("Wait cancelled: session is quitting")]
    Cancelled,

    #[error("Session is closed. Create a new session with Session::create")]
    SessionClosed,

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Test Errors ===
    #[error("Test assertion failed: {0}")]
    TestAssertion(String),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" with code {code}"),
        None => " (killed by signal)".to_string(),
    }
}

fn millis(after: &Duration) -> u128 {
    after.as_millis()
}

impl Error {
    /// Create a spawn error for a program
    pub fn spawn<S: ToString>(program: &str, reason: S) -> Self {
        Self::Spawn {
            program: program.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a timeout error for a pattern
    pub fn timeout(pattern: &str, after: Duration) -> Self {
        Self::Timeout {
            pattern: pattern.to_string(),
            after,
        }
    }

    /// Create an invalid pattern error
    pub fn invalid_pattern(pattern: &str, reason: &regex::Error) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Stable identifier for reports
    pub fn code(&self) -> &'static str {
        match self {
            Error::Spawn { .. } => "SPAWN_ERROR",
            Error::Write(_) => "WRITE_ERROR",
            Error::ProcessExited { .. } => "PROCESS_EXITED",
            Error::Timeout { .. } => "TIMEOUT",
            Error::Cancelled => "CANCELLED",
            Error::SessionClosed => "SESSION_CLOSED",
            Error::InvalidPattern { .. } => "INVALID_PATTERN",
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG_ERROR",
            Error::TestAssertion(_) => "TEST_ASSERTION",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Whether this error settled an expectation (as opposed to a setup failure)
    pub fn is_settlement(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. }
                | Error::ProcessExited { .. }
                | Error::Cancelled
                | Error::SessionClosed
        )
    }
}
