//! Request descriptors handed to a [`Transport`](crate::transport::Transport).
//!
//! An [`Invocation`] is validated when it is built and is immutable afterwards, so
//! the retry loop can replay it as many times as it needs.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;

use crate::error::{Result, SdkError};

/// Transport kind of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Http,
    Ssh,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Http => write!(f, "http"),
            TransportKind::Ssh => write!(f, "ssh"),
        }
    }
}

/// HTTP request body.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    #[default]
    Empty,
    /// Serialized as JSON with `Content-Type: application/json`
    Json(Value),
    /// Sent as-is
    Raw(Vec<u8>),
}

/// A single HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    /// Sets a header, replacing any existing header with the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Looks up a header value by case-insensitive name.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// How an SSH session authenticates.
#[derive(Clone, PartialEq)]
pub enum SshAuth {
    Password(String),
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshAuth::Password(_) => f.write_str("Password(****)"),
            SshAuth::KeyFile { path, .. } => f.debug_struct("KeyFile").field("path", path).finish(),
        }
    }
}

/// Remote host an SSH command runs on.
#[derive(Debug, Clone, PartialEq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: SshAuth,
}

/// A command executed over a fresh SSH session.
#[derive(Debug, Clone)]
pub struct SshCommand {
    pub target: SshTarget,
    pub command: String,
}

/// Transport-specific part of an invocation.
#[derive(Debug, Clone)]
pub enum Request {
    Http(HttpRequest),
    Ssh(SshCommand),
}

/// One logical remote call with its timeout.
#[derive(Debug, Clone)]
pub struct Invocation {
    request: Request,
    timeout: Duration,
}

impl Invocation {
    /// Builds an HTTP invocation. Fails with a configuration error for an empty URL or
    /// a zero timeout.
    pub fn http(request: HttpRequest, timeout: Duration) -> Result<Self> {
        if request.url.trim().is_empty() {
            return Err(SdkError::configuration("HTTP invocation requires a URL"));
        }
        Self::new(Request::Http(request), timeout)
    }

    /// Builds an SSH invocation. Fails with a configuration error for an empty host,
    /// user or command, a zero port, or a zero timeout.
    pub fn ssh(command: SshCommand, timeout: Duration) -> Result<Self> {
        if command.target.host.trim().is_empty() {
            return Err(SdkError::configuration("SSH invocation requires a host"));
        }
        if command.target.port == 0 {
            return Err(SdkError::configuration("SSH port must be non-zero"));
        }
        if command.target.user.is_empty() {
            return Err(SdkError::configuration("SSH invocation requires a user"));
        }
        if command.command.trim().is_empty() {
            return Err(SdkError::configuration("SSH invocation requires a command"));
        }
        Self::new(Request::Ssh(command), timeout)
    }

    fn new(request: Request, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(SdkError::configuration("timeout must be greater than zero"));
        }
        Ok(Self { request, timeout })
    }

    pub fn kind(&self) -> TransportKind {
        match self.request {
            Request::Http(_) => TransportKind::Http,
            Request::Ssh(_) => TransportKind::Ssh,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// URL for HTTP invocations, `host:port` for SSH ones.
    pub fn target(&self) -> String {
        match &self.request {
            Request::Http(http) => http.url.clone(),
            Request::Ssh(ssh) => format!("{}:{}", ssh.target.host, ssh.target.port),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.request {
            Request::Http(http) => write!(f, "{} {}", http.method, http.url),
            Request::Ssh(ssh) => write!(
                f,
                "ssh {}@{}:{}",
                ssh.target.user, ssh.target.host, ssh.target.port
            ),
        }
    }
}
