//! Scenario runner
//!
//! Reads YAML scenarios and plays them against a live session, turning
//! the nested wait/send callbacks of a hand-written debugger test into
//! an explicit list of named steps.

mod config;
mod runner;

pub use config::*;
pub use runner::{check_line, check_lines, load_scenario, run_scenario, TestResult};
