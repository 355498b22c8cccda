// # Error Reporter Trait
//
// Outbound notification of failures to an external error tracker.
//
// Reporting is fire-and-forget: a reporter must never fail the pass and
// must never block it for longer than its own bounded timeout. When no
// tracker is configured, `NoopReporter` stands in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, ErrorKind};

/// A failure as handed to an error tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNotice {
    /// Failure classification (used as the error class)
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
    /// Whether the failure escaped normal error handling (e.g. a panic)
    pub unhandled: bool,
    /// Extra key/value context
    pub context: BTreeMap<String, String>,
}

impl FailureNotice {
    /// Create a notice
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            unhandled: false,
            context: BTreeMap::new(),
        }
    }

    /// Mark the failure as unhandled
    pub fn unhandled(mut self) -> Self {
        self.unhandled = true;
        self
    }

    /// Attach a context value
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl From<&Error> for FailureNotice {
    fn from(err: &Error) -> Self {
        FailureNotice::new(err.kind(), err.to_string())
    }
}

/// Trait for error tracker integrations
#[async_trait]
pub trait ErrorReporter: Send + Sync {
    /// Forward a failure; errors are handled internally
    async fn notify(&self, notice: &FailureNotice);

    /// Reporter name (for logging)
    fn reporter_name(&self) -> &'static str;
}

/// Reporter used when no error tracker is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

#[async_trait]
impl ErrorReporter for NoopReporter {
    async fn notify(&self, notice: &FailureNotice) {
        tracing::debug!(
            "No error reporter configured, dropping {} notice",
            notice.kind
        );
    }

    fn reporter_name(&self) -> &'static str {
        "noop"
    }
}
