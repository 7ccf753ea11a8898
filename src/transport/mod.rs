//! Transport adapters: a single remote attempt with timeout, no retries.
//!
//! - `http` - REST calls through reqwest
//! - `ssh` - command execution through russh
//!
//! [`RemoteTransport`] dispatches an [`Invocation`] to the adapter matching its kind.

mod http;
mod ssh;

use std::fmt;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{BoxError, ErrorKind, SdkError};
use crate::invocation::{Invocation, Request};

pub use http::HttpTransport;
pub use ssh::SshTransport;

/// Successful HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> crate::Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            SdkError::new(ErrorKind::Unknown, "Failed to parse JSON response").with_cause(e)
        })
    }

    /// Parses the body as a JSON value; an empty body is `Value::Null`.
    pub fn json_value(&self) -> crate::Result<Value> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        self.json()
    }
}

/// Output of a remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: u32,
}

/// Success payload of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Http(HttpResponse),
    Ssh(CommandOutput),
}

/// What went wrong in a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureTag {
    /// Non-2xx HTTP response
    HttpStatus { status: u16, body: String },
    /// The attempt did not finish within the invocation timeout
    Timeout,
    /// Connect, reset, broken pipe and other network-level errors
    Connection,
    /// Remote command finished with a non-zero exit status
    SshExit { code: u32, stderr: String },
    /// SSH server rejected the credentials
    SshAuth,
    /// The request could not be built or sent as described
    InvalidRequest,
    Other,
}

impl FailureTag {
    /// Transient failures may succeed on retry; everything else is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            FailureTag::Timeout | FailureTag::Connection => true,
            FailureTag::HttpStatus { status, .. } => match StatusCode::from_u16(*status) {
                Ok(code) => code == StatusCode::TOO_MANY_REQUESTS || code.is_server_error(),
                Err(_) => false,
            },
            FailureTag::SshExit { .. }
            | FailureTag::SshAuth
            | FailureTag::InvalidRequest
            | FailureTag::Other => false,
        }
    }
}

/// A failed attempt. Consumed by the retry policy and, once terminal, by the normalizer.
#[derive(Debug)]
pub struct Failure {
    tag: FailureTag,
    message: String,
    cause: Option<BoxError>,
}

impl Failure {
    pub fn new(tag: FailureTag, message: impl Into<String>) -> Self {
        Self {
            tag,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn tag(&self) -> &FailureTag {
        &self.tag
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_transient(&self) -> bool {
        self.tag.is_transient()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {}", self.message, cause),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// Outcome of a single attempt.
pub type AttemptResult = std::result::Result<Payload, Failure>;

/// Executes exactly one attempt of an invocation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, invocation: &Invocation) -> AttemptResult;
}

/// Routes HTTP invocations to [`HttpTransport`] and SSH ones to [`SshTransport`].
#[derive(Clone)]
pub struct RemoteTransport {
    http: HttpTransport,
    ssh: SshTransport,
}

impl RemoteTransport {
    pub fn new(http: HttpTransport, ssh: SshTransport) -> Self {
        Self { http, ssh }
    }
}

#[async_trait]
impl Transport for RemoteTransport {
    async fn execute(&self, invocation: &Invocation) -> AttemptResult {
        match invocation.request() {
            Request::Http(_) => self.http.execute(invocation).await,
            Request::Ssh(_) => self.ssh.execute(invocation).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> FailureTag {
        FailureTag::HttpStatus {
            status: code,
            body: String::new(),
        }
    }

    #[test]
    fn test_transient_tags() {
        assert!(FailureTag::Timeout.is_transient());
        assert!(FailureTag::Connection.is_transient());
        assert!(status(500).is_transient());
        assert!(status(502).is_transient());
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
    }

    #[test]
    fn test_permanent_tags() {
        assert!(!status(400).is_transient());
        assert!(!status(401).is_transient());
        assert!(!status(403).is_transient());
        assert!(!status(404).is_transient());
        assert!(!status(1000).is_transient());
        assert!(
            !FailureTag::SshExit {
                code: 1,
                stderr: "boom".into()
            }
            .is_transient()
        );
        assert!(!FailureTag::SshAuth.is_transient());
        assert!(!FailureTag::InvalidRequest.is_transient());
        assert!(!FailureTag::Other.is_transient());
    }

    #[test]
    fn test_failure_display_and_source() {
        use std::error::Error;

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let failure = Failure::new(FailureTag::Connection, "request failed").with_cause(io);

        assert_eq!(failure.to_string(), "request failed: reset by peer");
        assert!(failure.source().is_some());
        assert!(failure.is_transient());
    }

    #[test]
    fn test_json_value_of_empty_body_is_null() {
        let response = HttpResponse {
            status: 200,
            body: Vec::new(),
        };
        assert_eq!(response.json_value().unwrap(), Value::Null);
    }

    #[test]
    fn test_json_parse_failure_is_unknown() {
        let response = HttpResponse {
            status: 200,
            body: b"<html>".to_vec(),
        };
        let err = response.json_value().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }
}
