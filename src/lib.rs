//! Debug Harness - drive interactive debuggers from tests
//!
//! This library launches a debugger (lldb with a Node.js script by
//! default), writes commands to it and waits for expected output lines,
//! with per-wait timeouts and strictly ordered settlement.

pub mod cli;
pub mod commands;
pub mod common;
pub mod process;
pub mod session;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use process::{LaunchSpec, Line, OutputChannel};
pub use session::{Matcher, Pending, Session, SessionOptions, SessionState};
