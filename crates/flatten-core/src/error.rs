//! Error types for the CNAME flattener
//!
//! This module defines all error types used throughout the workspace.
//! Resolver and provider crates map their transport errors into these
//! variants so the reconciler can decide on retries and report kinds
//! without knowing which library produced them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for flattener operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the CNAME flattener
#[derive(Error, Debug)]
pub enum Error {
    /// The name could not be resolved (NXDOMAIN, SERVFAIL, no reachable nameserver)
    #[error("Resolution failed for {name}: {message}")]
    Resolution {
        /// Name that was queried
        name: String,
        /// Resolver message
        message: String,
    },

    /// The name resolved, but to zero IPv4 addresses
    #[error("Resolution of {0} returned no IPv4 addresses")]
    EmptyResolution(String),

    /// A bounded network call did not complete in time
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What was being attempted
        operation: String,
        /// Configured bound
        after: Duration,
    },

    /// The provider rejected the credentials
    #[error("Provider authentication failed: {0}")]
    ProviderAuth(String),

    /// The provider answered with something other than the expected envelope
    #[error("Unexpected provider response: {0}")]
    ProviderProtocol(String),

    /// The provider could not be reached
    #[error("Provider transport error: {0}")]
    ProviderTransport(String),

    /// The provider is rate limiting us
    #[error("Provider rate limit exceeded: {0}")]
    ProviderThrottled(String),

    /// The provider returned a well-formed error envelope
    #[error("Provider rejected request ({code}): {message}")]
    ProviderRejected {
        /// Provider error code, empty when none was given
        code: String,
        /// Provider message
        message: String,
    },

    /// A record was created but left in the wrong service mode
    #[error("Record {record_id} for {address} was created but could not be unproxied: {message}")]
    IncompleteCreate {
        /// Address of the new record
        address: Ipv4Addr,
        /// Provider id of the record that now exists
        record_id: String,
        /// Why the second step failed
        message: String,
    },

    /// Some additions or removals failed while others succeeded
    #[error("{failed} of {attempted} record changes failed")]
    PartialApply {
        /// Number of failed operations
        failed: usize,
        /// Number of attempted operations
        attempted: usize,
    },

    /// Another pass holds the lock
    #[error("Another pass is already running (lock held on {})", .0.display())]
    PassInProgress(PathBuf),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Failure classification carried in reports and error notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Resolution,
    Timeout,
    ProviderAuth,
    ProviderProtocol,
    ProviderTransport,
    ProviderThrottled,
    ProviderRejected,
    IncompleteCreate,
    PartialApply,
    PassInProgress,
    Config,
    Io,
    Other,
}

impl ErrorKind {
    /// Stable name used in logs and error notifications
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Resolution => "resolution",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ProviderAuth => "provider_auth",
            ErrorKind::ProviderProtocol => "provider_protocol",
            ErrorKind::ProviderTransport => "provider_transport",
            ErrorKind::ProviderThrottled => "provider_throttled",
            ErrorKind::ProviderRejected => "provider_rejected",
            ErrorKind::IncompleteCreate => "incomplete_create",
            ErrorKind::PartialApply => "partial_apply",
            ErrorKind::PassInProgress => "pass_in_progress",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
            ErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Create a resolution error
    pub fn resolution(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolution {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create a provider authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::ProviderAuth(msg.into())
    }

    /// Create a provider protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProviderProtocol(msg.into())
    }

    /// Create a provider transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::ProviderTransport(msg.into())
    }

    /// Create a rate limit error
    pub fn throttled(msg: impl Into<String>) -> Self {
        Self::ProviderThrottled(msg.into())
    }

    /// Create a provider rejection error
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderRejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Resolution { .. } | Error::EmptyResolution(_) => ErrorKind::Resolution,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::ProviderAuth(_) => ErrorKind::ProviderAuth,
            Error::ProviderProtocol(_) => ErrorKind::ProviderProtocol,
            Error::ProviderTransport(_) => ErrorKind::ProviderTransport,
            Error::ProviderThrottled(_) => ErrorKind::ProviderThrottled,
            Error::ProviderRejected { .. } => ErrorKind::ProviderRejected,
            Error::IncompleteCreate { .. } => ErrorKind::IncompleteCreate,
            Error::PartialApply { .. } => ErrorKind::PartialApply,
            Error::PassInProgress(_) => ErrorKind::PassInProgress,
            Error::Config(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
            Error::Json(_) | Error::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether the reconciler may retry the operation that produced this error
    ///
    /// An empty resolution is never retried: it is the blackout case the
    /// pass must abort on, not a flaky lookup.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Resolution { .. }
                | Error::Timeout { .. }
                | Error::ProviderTransport(_)
                | Error::ProviderThrottled(_)
        )
    }

    /// Whether a write that failed this way may still have reached the provider
    ///
    /// Timeouts and transport failures can happen after the provider acted
    /// on the request.
    pub fn may_have_applied(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::ProviderTransport(_))
    }

    /// Whether a non-idempotent write may be sent again after this error
    pub fn is_safe_to_resend(&self) -> bool {
        self.is_retryable() && !self.may_have_applied()
    }
}
