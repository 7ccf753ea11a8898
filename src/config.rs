//! Client configuration.
//!
//! A [`ClientConfig`] is assembled once, validated, and then shared immutably by a
//! [`ManagementClient`](crate::client::ManagementClient). It can be built
//! programmatically with [`ClientConfig::builder`] or read from the environment with
//! [`ClientConfig::from_env`]:
//!
//! | variable | meaning |
//! |---|---|
//! | `F5_HOST` | management address (required) |
//! | `F5_PORT` | REST port, default 443 |
//! | `F5_SCHEME` | `https` (default) or `http` |
//! | `F5_SSH_PORT` | SSH port, default 22 |
//! | `F5_USER` / `F5_PASSWORD` | basic credentials |
//! | `F5_TOKEN` | existing auth token |
//! | `F5_PRIVATE_KEY` | private key file for SSH (with `F5_USER`) |
//! | `F5_PRIVATE_KEY_PASSPHRASE` | passphrase for the private key |
//! | `F5_TIMEOUT_SECS` | per-attempt timeout |
//! | `F5_MAX_ATTEMPTS` / `F5_BASE_DELAY_SECS` | retry settings |
//! | `F5_VERIFY_TLS` | `true` to verify the device certificate |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::debug;

use crate::error::{Result, SdkError};
use crate::retry::RetryConfig;
use crate::runtime::Runtime;

/// Default REST port.
pub const DEFAULT_PORT: u16 = 443;

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// User agent sent with every REST request.
pub const USER_AGENT: &str = concat!("f5-sdk-rust/", env!("F5SDK_VERSION"));

/// How the client authenticates against the device.
#[derive(Clone, PartialEq)]
pub enum Credentials {
    /// Pre-issued auth token, sent as `X-F5-Auth-Token`
    Token(String),
    /// User and password, exchanged for a token at connect time
    Basic { user: String, password: String },
    /// User and private key file, used for SSH
    KeyPair {
        user: String,
        private_key: PathBuf,
        passphrase: Option<String>,
    },
}

impl Credentials {
    /// The user name, if the credentials carry one.
    pub fn user(&self) -> Option<&str> {
        match self {
            Credentials::Token(_) => None,
            Credentials::Basic { user, .. } | Credentials::KeyPair { user, .. } => Some(user.as_str()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Token(_) => f.write_str("Token(****)"),
            Credentials::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .field("password", &"****")
                .finish(),
            Credentials::KeyPair {
                user, private_key, ..
            } => f
                .debug_struct("KeyPair")
                .field("user", user)
                .field("private_key", private_key)
                .finish(),
        }
    }
}

/// URL scheme for REST calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    Http,
    #[default]
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => write!(f, "http"),
            Scheme::Https => write!(f, "https"),
        }
    }
}

impl FromStr for Scheme {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            _ => Err(SdkError::configuration(format!(
                "Unknown scheme: {}. Expected http or https.",
                s
            ))),
        }
    }
}

/// Validated, immutable client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    host: String,
    port: u16,
    ssh_port: u16,
    scheme: Scheme,
    credentials: Credentials,
    timeout: Duration,
    retry: RetryConfig,
    verify_tls: bool,
    user_agent: String,
}

impl ClientConfig {
    pub fn builder(host: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(host)
    }

    /// Reads the configuration from `F5_*` environment variables.
    #[tracing::instrument(skip(runtime))]
    pub fn from_env<R: Runtime>(runtime: &R) -> Result<Self> {
        let var = |key: &str| runtime.env_var(key).ok().filter(|v| !v.trim().is_empty());

        let host = var("F5_HOST")
            .ok_or_else(|| SdkError::configuration("F5_HOST environment variable is not set"))?;
        let mut builder = ClientConfigBuilder::new(host);

        if let Some(port) = var("F5_PORT") {
            builder = builder.port(parse_env("F5_PORT", &port)?);
        }
        if let Some(port) = var("F5_SSH_PORT") {
            builder = builder.ssh_port(parse_env("F5_SSH_PORT", &port)?);
        }
        if let Some(scheme) = var("F5_SCHEME") {
            builder = builder.scheme(scheme.parse()?);
        }
        if let Some(secs) = var("F5_TIMEOUT_SECS") {
            let secs: f64 = parse_env("F5_TIMEOUT_SECS", &secs)?;
            let timeout = Duration::try_from_secs_f64(secs)
                .ok()
                .filter(|timeout| !timeout.is_zero())
                .ok_or_else(|| {
                    SdkError::configuration(format!(
                        "F5_TIMEOUT_SECS must be a positive number of seconds, got {}",
                        secs
                    ))
                })?;
            builder = builder.timeout(timeout);
        }
        if let Some(verify) = var("F5_VERIFY_TLS") {
            builder = builder.verify_tls(parse_env("F5_VERIFY_TLS", &verify.to_lowercase())?);
        }

        let mut retry = RetryConfig::default();
        if let Some(attempts) = var("F5_MAX_ATTEMPTS") {
            retry.max_attempts = parse_env("F5_MAX_ATTEMPTS", &attempts)?;
        }
        if let Some(delay) = var("F5_BASE_DELAY_SECS") {
            retry.base_delay = parse_env("F5_BASE_DELAY_SECS", &delay)?;
        }
        builder = builder.retry(retry);

        // A token wins over user credentials; a password wins over a key
        if let Some(token) = var("F5_TOKEN") {
            debug!("Using F5_TOKEN for authentication");
            builder = builder.token(token);
        } else if let Some(user) = var("F5_USER") {
            if let Some(password) = var("F5_PASSWORD") {
                builder = builder.basic_auth(user, password);
            } else if let Some(key) = var("F5_PRIVATE_KEY") {
                builder = builder.private_key(user, key, var("F5_PRIVATE_KEY_PASSPHRASE"));
            }
        }

        builder.build()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ssh_port(&self) -> u16 {
        self.ssh_port
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn verify_tls(&self) -> bool {
        self.verify_tls
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// `scheme://host[:port]`, omitting the scheme's default port. IPv6 literals
    /// are bracketed.
    pub fn base_url(&self) -> String {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        match (self.scheme, self.port) {
            (Scheme::Https, 443) | (Scheme::Http, 80) => format!("{}://{}", self.scheme, host),
            _ => format!("{}://{}:{}", self.scheme, host, self.port),
        }
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.trim().parse::<T>().map_err(|e| {
        SdkError::configuration(format!("Invalid value for {}: {:?}", key, value)).with_cause(e)
    })
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    host: String,
    port: u16,
    ssh_port: u16,
    scheme: Scheme,
    credentials: Option<Credentials>,
    timeout: Duration,
    retry: RetryConfig,
    verify_tls: bool,
    user_agent: String,
}

impl ClientConfigBuilder {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            ssh_port: DEFAULT_SSH_PORT,
            scheme: Scheme::default(),
            credentials: None,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryConfig::default(),
            // Devices ship with self-signed management certificates
            verify_tls: false,
            user_agent: USER_AGENT.to_string(),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn ssh_port(mut self, port: u16) -> Self {
        self.ssh_port = port;
        self
    }

    pub fn scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn token(self, token: impl Into<String>) -> Self {
        self.credentials(Credentials::Token(token.into()))
    }

    pub fn basic_auth(self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials(Credentials::Basic {
            user: user.into(),
            password: password.into(),
        })
    }

    pub fn private_key(
        self,
        user: impl Into<String>,
        private_key: impl Into<PathBuf>,
        passphrase: Option<String>,
    ) -> Self {
        self.credentials(Credentials::KeyPair {
            user: user.into(),
            private_key: private_key.into(),
            passphrase,
        })
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Validates every option. Nothing touches the network here.
    pub fn build(self) -> Result<ClientConfig> {
        let host = self.host.trim().to_string();
        if host.is_empty() {
            return Err(SdkError::configuration("host must not be empty"));
        }
        if self.port == 0 || self.ssh_port == 0 {
            return Err(SdkError::configuration("ports must be non-zero"));
        }
        if self.timeout.is_zero() {
            return Err(SdkError::configuration("timeout must be greater than zero"));
        }
        self.retry.validate()?;

        let credentials = self.credentials.ok_or_else(|| {
            SdkError::configuration("user/password credentials, private key or token required")
        })?;
        match &credentials {
            Credentials::Token(token) if token.is_empty() => {
                return Err(SdkError::configuration("token must not be empty"));
            }
            Credentials::Basic { user, .. } | Credentials::KeyPair { user, .. }
                if user.is_empty() =>
            {
                return Err(SdkError::configuration("user must not be empty"));
            }
            _ => {}
        }

        Ok(ClientConfig {
            host,
            port: self.port,
            ssh_port: self.ssh_port,
            scheme: self.scheme,
            credentials,
            timeout: self.timeout,
            retry: self.retry,
            verify_tls: self.verify_tls,
            user_agent: self.user_agent,
        })
    }
}
