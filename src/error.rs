//! Error taxonomy for the harness.
//!
//! None of these are recovered inside the core: each one propagates to the
//! test (or the runner), which reports it and moves on to the next case.

use std::fmt;

use crate::message::ParseError;

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Malformed wire line. Fatal: a conformance test must not treat garbage
    /// as a message it merely finds uninteresting.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The peer closed the connection or the read/write failed. Expected
    /// (and asserted for) in disconnection tests, a failure everywhere else.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The peer sent a structurally invalid sequence (bad CAP shape, wrong
    /// NICK/USER arity). Not retried: making no sense of the peer IS the
    /// test result.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// An expected-vs-actual mismatch, with one entry per diverging field.
    #[error("{0}")]
    Assertion(AssertionFailure),

    /// The controller reports that an optional extension under test is not
    /// implemented by this peer. Runners mark the case skipped, not failed.
    #[error("optional feature not supported: {0}")]
    FeatureNotSupported(String),
}

impl HarnessError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Single-field assertion failure.
    pub fn assertion(
        field: &'static str,
        actual: impl Into<String>,
        expected: impl Into<String>,
        context: Option<&str>,
    ) -> Self {
        Self::Assertion(AssertionFailure {
            mismatches: vec![Mismatch {
                field,
                actual: actual.into(),
                expected: expected.into(),
            }],
            context: context.map(|s| s.to_string()),
        })
    }
}

/// One diverging field of a structured comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub field: &'static str,
    pub actual: String,
    pub expected: String,
}

/// A failed comparison. Carries every mismatching field so a multi-part
/// reply (e.g. CAP subcommand + subparams) reports all divergences at once.
#[derive(Debug, Clone)]
pub struct AssertionFailure {
    pub mismatches: Vec<Mismatch>,
    pub context: Option<String>,
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "assertion failed")?;
        if let Some(ref ctx) = self.context {
            write!(f, " ({ctx})")?;
        }
        for m in &self.mismatches {
            write!(
                f,
                ": {} was {:?}, expected {:?}",
                m.field, m.actual, m.expected
            )?;
        }
        Ok(())
    }
}
