//! Management client for BIG-IP and BIG-IQ devices.
//!
//! [`ManagementClient`] is the facade the product clients build on. Each call builds
//! an [`Invocation`], runs it through the [`RetryPolicy`] and a [`Transport`], and
//! passes the terminal result through the normalizer, so callers only ever see a
//! payload or a classified [`SdkError`].

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use reqwest::{Client, Method};
use serde_json::{Value, json};

use crate::config::{ClientConfig, Credentials};
use crate::error::{ErrorKind, Result, SdkError};
use crate::invocation::{Body, HttpRequest, Invocation, SshAuth, SshCommand, SshTarget};
use crate::normalize::normalize;
use crate::retry::RetryPolicy;
use crate::transport::{
    CommandOutput, HttpResponse, HttpTransport, Payload, RemoteTransport, SshTransport, Transport,
};

/// Token login endpoint.
pub const LOGIN_URI: &str = "/mgmt/shared/authn/login";

/// Software version endpoint.
pub const VERSION_URI: &str = "/mgmt/tm/sys/version";

/// Header carrying the auth token.
pub const AUTH_TOKEN_HEADER: &str = "X-F5-Auth-Token";

const VERSION_ENTRY: &str = "https://localhost/mgmt/tm/sys/version/0";

/// Per-request options for [`ManagementClient::make_request`].
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    /// Added after the default headers, overriding them on name clashes
    pub headers: Vec<(String, String)>,
    pub body: Body,
    /// Overrides the client's default timeout
    pub timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new(Method::GET)
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            headers: Vec::new(),
            body: Body::Empty,
            timeout: None,
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post(body: Value) -> Self {
        Self::new(Method::POST).json(body)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Body::Json(body);
        self
    }

    pub fn raw(mut self, body: Vec<u8>) -> Self {
        self.body = Body::Raw(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Device software information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub version: String,
}

/// Client for one device. Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct ManagementClient {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    token: Option<String>,
}

impl ManagementClient {
    /// Creates a client with the default reqwest/russh transports and logs in when the
    /// configuration carries user/password credentials.
    #[tracing::instrument(skip(config), fields(host = %config.host()))]
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent())
            .danger_accept_invalid_certs(!config.verify_tls())
            .build()
            .map_err(|e| SdkError::configuration("Failed to build HTTP client").with_cause(e))?;
        let transport = RemoteTransport::new(HttpTransport::new(http), SshTransport::default());

        Self::with_transport(config, Arc::new(transport)).await
    }

    /// Creates a client on top of a caller-provided transport.
    pub async fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let retry = RetryPolicy::new(config.retry().clone())?;
        let mut client = Self {
            config: Arc::new(config),
            transport,
            retry,
            token: None,
        };

        client.token = match client.config.credentials() {
            Credentials::Token(token) => Some(token.clone()),
            Credentials::Basic { user, password } => Some(client.login(user, password).await?),
            Credentials::KeyPair { .. } => {
                debug!("Key pair credentials: REST requests are sent without an auth token");
                None
            }
        };

        Ok(client)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Exchanges user/password for an auth token.
    #[tracing::instrument(skip(self, password))]
    async fn login(&self, user: &str, password: &str) -> Result<String> {
        let request = HttpRequest::new(Method::POST, self.url(LOGIN_URI))
            .header("User-Agent", self.config.user_agent())
            .body(Body::Json(json!({
                "username": user,
                "password": password,
                "loginProviderName": "tmos",
            })));

        let response: Value = self
            .execute_http(request, self.config.timeout())
            .await?
            .json()?;

        let token = response["token"]["token"]
            .as_str()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                SdkError::new(ErrorKind::Unknown, "Login response did not contain a token")
            })?;

        info!("Logged in to {} as {}", self.config.host(), user);
        Ok(token.to_string())
    }

    /// Makes a REST request against the device and returns the parsed JSON body
    /// (`Value::Null` for an empty body).
    pub async fn make_request(&self, uri: &str, options: RequestOptions) -> Result<Value> {
        Ok(self.make_request_advanced(uri, options).await?.0)
    }

    /// Like [`make_request`](Self::make_request), also returning the status code.
    #[tracing::instrument(skip(self, options), fields(method = %options.method))]
    pub async fn make_request_advanced(
        &self,
        uri: &str,
        options: RequestOptions,
    ) -> Result<(Value, u16)> {
        let mut request = HttpRequest::new(options.method, self.url(uri))
            .header("User-Agent", self.config.user_agent());
        if let Some(token) = &self.token {
            request = request.header(AUTH_TOKEN_HEADER, token.clone());
        }
        for (name, value) in options.headers {
            request = request.header(name, value);
        }
        let request = request.body(options.body);

        let timeout = options.timeout.unwrap_or(self.config.timeout());
        let response = self.execute_http(request, timeout).await?;
        Ok((response.json_value()?, response.status))
    }

    /// Runs a command on the device over SSH. A non-zero exit status is a
    /// [`ErrorKind::Fatal`] error carrying the command's stderr.
    #[tracing::instrument(skip(self))]
    pub async fn make_request_ssh(&self, command: &str) -> Result<CommandOutput> {
        let invocation = Invocation::ssh(
            SshCommand {
                target: self.ssh_target()?,
                command: command.to_string(),
            },
            self.config.timeout(),
        )?;

        match self.execute(invocation).await? {
            Payload::Ssh(output) => Ok(output),
            Payload::Http(_) => Err(SdkError::new(
                ErrorKind::Unknown,
                "Transport returned an HTTP response for an SSH command",
            )),
        }
    }

    /// Fetches device software information.
    #[tracing::instrument(skip(self))]
    pub async fn get_info(&self) -> Result<DeviceInfo> {
        let response = self.make_request(VERSION_URI, RequestOptions::get()).await?;

        let version = response["entries"][VERSION_ENTRY]["nestedStats"]["entries"]["Version"]
            ["description"]
            .as_str()
            .ok_or_else(|| {
                SdkError::new(
                    ErrorKind::Unknown,
                    "Version not found in /mgmt/tm/sys/version response",
                )
            })?;

        Ok(DeviceInfo {
            version: version.to_string(),
        })
    }

    /// Downloads an arbitrary URL (not necessarily on the device) without the auth
    /// token, with the same retry and error handling as device calls.
    #[tracing::instrument(skip(self))]
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let request =
            HttpRequest::new(Method::GET, url).header("User-Agent", self.config.user_agent());
        let response = self.execute_http(request, self.config.timeout()).await?;
        debug!(
            "Downloaded {:.2} MB from {}",
            response.body.len() as f64 / (1024.0 * 1024.0),
            url
        );
        Ok(response.body)
    }

    async fn execute(&self, invocation: Invocation) -> Result<Payload> {
        normalize(self.retry.invoke(&invocation, self.transport.as_ref()).await)
    }

    async fn execute_http(&self, request: HttpRequest, timeout: Duration) -> Result<HttpResponse> {
        let invocation = Invocation::http(request, timeout)?;
        match self.execute(invocation).await? {
            Payload::Http(response) => Ok(response),
            Payload::Ssh(_) => Err(SdkError::new(
                ErrorKind::Unknown,
                "Transport returned SSH output for an HTTP request",
            )),
        }
    }

    /// Absolute URLs pass through; anything else is relative to the device base URL.
    fn url(&self, uri: &str) -> String {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return uri.to_string();
        }
        let separator = if uri.starts_with('/') { "" } else { "/" };
        format!("{}{}{}", self.config.base_url(), separator, uri)
    }

    fn ssh_target(&self) -> Result<SshTarget> {
        let (user, auth) = match self.config.credentials() {
            Credentials::Basic { user, password } => {
                (user.clone(), SshAuth::Password(password.clone()))
            }
            Credentials::KeyPair {
                user,
                private_key,
                passphrase,
            } => (
                user.clone(),
                SshAuth::KeyFile {
                    path: private_key.clone(),
                    passphrase: passphrase.clone(),
                },
            ),
            Credentials::Token(_) => {
                return Err(SdkError::configuration(
                    "SSH requires user/password or private key credentials",
                ));
            }
        };

        Ok(SshTarget {
            host: self
                .config
                .host()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string(),
            port: self.config.ssh_port(),
            user,
            auth,
        })
    }
}
