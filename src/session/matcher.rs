//! Line matchers
//!
//! Every expectation carries one [`Matcher`]. The wait queue only ever
//! calls [`Matcher::is_match`], so adding a kind means adding a variant
//! here and nothing else.

use std::fmt;

use regex::Regex;

use crate::common::{Error, Result};

/// Something a line of target output can satisfy
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Line contains this text
    Text(String),
    /// Regex finds a match anywhere in the line
    Regex(Regex),
    /// The target reports it is stopped and ready for commands
    ///
    /// Matched like `Regex`, but carries the session's break pattern so
    /// logs and errors can tell a break wait apart from an ordinary one.
    Ready(Regex),
}

impl Matcher {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Compile a regex matcher
    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self::Regex)
            .map_err(|e| Error::invalid_pattern(pattern, &e))
    }

    /// Compile a ready/break matcher
    pub fn ready(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self::Ready)
            .map_err(|e| Error::invalid_pattern(pattern, &e))
    }

    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Self::Text(needle) => text.contains(needle.as_str()),
            Self::Regex(re) | Self::Ready(re) => re.is_match(text),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{text:?}"),
            Self::Regex(re) => write!(f, "/{}/", re.as_str()),
            Self::Ready(re) => write!(f, "break /{}/", re.as_str()),
        }
    }
}

impl From<Regex> for Matcher {
    fn from(re: Regex) -> Self {
        Self::Regex(re)
    }
}

impl From<&Regex> for Matcher {
    fn from(re: &Regex) -> Self {
        Self::Regex(re.clone())
    }
}

impl From<&str> for Matcher {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Matcher {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}
