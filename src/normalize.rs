//! Maps terminal attempt results onto the SDK error taxonomy.

use reqwest::StatusCode;

use crate::error::{ErrorKind, SdkError};
use crate::transport::{AttemptResult, Failure, FailureTag, Payload};

/// Turns the terminal result of the retry loop into the caller-facing result.
/// Total: every failure becomes exactly one [`ErrorKind`].
pub fn normalize(result: AttemptResult) -> Result<Payload, SdkError> {
    result.map_err(normalize_failure)
}

/// Classifies a failure and keeps it as the error cause.
pub fn normalize_failure(failure: Failure) -> SdkError {
    let kind = classify(failure.tag());
    let message = match failure.tag() {
        FailureTag::HttpStatus { body, .. } if !body.trim().is_empty() => {
            format!("{}: {}", failure.message(), body.trim())
        }
        FailureTag::SshExit { stderr, .. } if !stderr.trim().is_empty() => {
            format!("{}: {}", failure.message(), stderr.trim())
        }
        _ => failure.message().to_string(),
    };
    SdkError::new(kind, message).with_cause(failure)
}

/// The error kind a failure tag maps to.
pub fn classify(tag: &FailureTag) -> ErrorKind {
    match tag {
        FailureTag::HttpStatus { status, .. } => classify_status(*status),
        FailureTag::Timeout | FailureTag::Connection => ErrorKind::Transient,
        FailureTag::SshExit { .. } => ErrorKind::Fatal,
        FailureTag::SshAuth => ErrorKind::Auth,
        FailureTag::InvalidRequest | FailureTag::Other => ErrorKind::Unknown,
    }
}

fn classify_status(status: u16) -> ErrorKind {
    let Ok(code) = StatusCode::from_u16(status) else {
        return ErrorKind::Unknown;
    };
    match code {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::Auth,
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => ErrorKind::Throttled,
        s if s.is_server_error() => ErrorKind::Transient,
        // Other 4xx client errors won't succeed on retry
        s if s.is_client_error() => ErrorKind::Fatal,
        _ => ErrorKind::Unknown,
    }
}
