//! Debugger session harness
//!
//! A [`Session`] launches a target, writes commands to it and resolves
//! expectations against its output, one line at a time and strictly in
//! the order expectations were registered.

mod driver;
mod handle;
mod matcher;
mod queue;

pub use handle::{Pending, Session, SessionOptions};
pub use matcher::Matcher;
pub use queue::{Expectation, ExpectationId, SettleFn, Settled, WaitQueue};

/// Session lifecycle
///
/// `Created → Running → Quitting → Terminated`, or straight from `Running`
/// to `Terminated` when the target exits on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Target spawned, event loop not yet started
    Created,
    /// Accepting commands and expectations
    Running,
    /// `quit()` in progress
    Quitting,
    /// Target gone; every operation but `quit` fails
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Quitting => write!(f, "quitting"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}
