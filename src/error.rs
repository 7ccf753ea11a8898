//! SDK-level error taxonomy.
//!
//! Every failure surfaced to callers is an [`SdkError`] carrying exactly one
//! [`ErrorKind`]. The original transport failure is kept as the error source for
//! diagnostics; callers are expected to branch on [`SdkError::kind`] only.

use std::fmt;

/// Boxed error used to retain the raw cause of a failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type returned by every public SDK operation.
pub type Result<T> = std::result::Result<T, SdkError>;

/// Normalized error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Credentials rejected (HTTP 401/403, SSH authentication failure)
    Auth,
    /// Resource does not exist (HTTP 404)
    NotFound,
    /// Device or service asked us to slow down (HTTP 429/503)
    Throttled,
    /// Timeouts, connection resets, server errors that outlived the retry budget
    Transient,
    /// Request or command was rejected and will not succeed on retry
    Fatal,
    /// Invalid client, retry or invocation setup; raised before any network I/O
    Configuration,
    /// Anything the normalizer does not recognize
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Auth => write!(f, "authentication error"),
            ErrorKind::NotFound => write!(f, "not found"),
            ErrorKind::Throttled => write!(f, "throttled"),
            ErrorKind::Transient => write!(f, "transient error"),
            ErrorKind::Fatal => write!(f, "fatal error"),
            ErrorKind::Configuration => write!(f, "configuration error"),
            ErrorKind::Unknown => write!(f, "unknown error"),
        }
    }
}

impl ErrorKind {
    /// Kinds worth another try when polling a device task.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::Throttled)
    }
}

/// A classified SDK error.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct SdkError {
    kind: ErrorKind,
    message: String,
    #[source]
    cause: Option<BoxError>,
}

impl SdkError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Shorthand for [`ErrorKind::Configuration`] errors.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Attaches the underlying cause.
    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The raw cause, if any. Meant for logging, not for control flow.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}
