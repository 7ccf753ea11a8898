//! CRUD client for a REST collection on the device.
//!
//! Some endpoints answer a write with `202 Accepted` and a `selfLink` to a task. The
//! client follows that link until the task reports completion, so callers always get
//! the final resource back.

use std::fmt;
use std::path::PathBuf;

use log::{debug, info};
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;

use crate::client::{ManagementClient, RequestOptions};
use crate::error::{ErrorKind, Result, SdkError};
use crate::invocation::Body;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::runtime::{RealRuntime, Runtime};

/// Default number of task polls.
pub const TASK_POLL_ATTEMPTS: u32 = 60;

/// Default seconds between task polls.
pub const TASK_POLL_INTERVAL_SECS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Create,
    Show,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::List,
        Operation::Create,
        Operation::Show,
        Operation::Update,
        Operation::Delete,
    ];
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::List => "list",
            Operation::Create => "create",
            Operation::Show => "show",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Where a resource declaration comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    Inline(Value),
    /// Local JSON file
    File(PathBuf),
}

impl ConfigSource {
    pub fn resolve<R: Runtime + ?Sized>(&self, runtime: &R) -> Result<Value> {
        match self {
            ConfigSource::Inline(value) => Ok(value.clone()),
            ConfigSource::File(path) => {
                let text = runtime.read_to_string(path).map_err(|e| {
                    SdkError::configuration(format!(
                        "Failed to read config file {}",
                        path.display()
                    ))
                    .with_cause(e)
                })?;
                serde_json::from_str(&text).map_err(|e| {
                    SdkError::configuration(format!(
                        "Config file {} is not valid JSON",
                        path.display()
                    ))
                    .with_cause(e)
                })
            }
        }
    }
}

impl From<Value> for ConfigSource {
    fn from(value: Value) -> Self {
        ConfigSource::Inline(value)
    }
}

impl From<PathBuf> for ConfigSource {
    fn from(path: PathBuf) -> Self {
        ConfigSource::File(path)
    }
}

pub struct FeatureClient<R: Runtime = RealRuntime> {
    client: ManagementClient,
    uri: String,
    allowed: Vec<Operation>,
    polling: RetryPolicy,
    runtime: R,
}

impl FeatureClient<RealRuntime> {
    pub fn new(client: ManagementClient, uri: impl Into<String>, allowed: &[Operation]) -> Self {
        Self::with_runtime(client, uri, allowed, RealRuntime)
    }
}

impl<R: Runtime> FeatureClient<R> {
    pub fn with_runtime(
        client: ManagementClient,
        uri: impl Into<String>,
        allowed: &[Operation],
        runtime: R,
    ) -> Self {
        let polling = RetryPolicy::polling(TASK_POLL_ATTEMPTS, TASK_POLL_INTERVAL_SECS);
        Self {
            client,
            uri: uri.into(),
            allowed: allowed.to_vec(),
            polling,
            runtime,
        }
    }

    /// Replaces the task polling schedule.
    pub fn with_polling(mut self, config: RetryConfig) -> Result<Self> {
        self.polling = RetryPolicy::new(config)?;
        Ok(self)
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn client(&self) -> &ManagementClient {
        &self.client
    }

    pub fn allows(&self, operation: Operation) -> bool {
        self.allowed.contains(&operation)
    }

    #[tracing::instrument(skip(self), fields(uri = %self.uri))]
    pub async fn list(&self) -> Result<Value> {
        self.check_allowed(Operation::List)?;
        self.request(&self.uri, Method::GET, Body::Empty).await
    }

    #[tracing::instrument(skip(self, config), fields(uri = %self.uri))]
    pub async fn create(&self, config: &ConfigSource) -> Result<Value> {
        self.check_allowed(Operation::Create)?;
        let body = config.resolve(&self.runtime)?;
        self.request(&self.uri, Method::POST, Body::Json(body)).await
    }

    #[tracing::instrument(skip(self), fields(uri = %self.uri))]
    pub async fn show(&self, name: &str) -> Result<Value> {
        self.check_allowed(Operation::Show)?;
        let uri = self.resource_uri(name)?;
        self.request(&uri, Method::GET, Body::Empty).await
    }

    #[tracing::instrument(skip(self, config), fields(uri = %self.uri))]
    pub async fn update(&self, name: &str, config: &ConfigSource) -> Result<Value> {
        self.check_allowed(Operation::Update)?;
        let uri = self.resource_uri(name)?;
        let body = config.resolve(&self.runtime)?;
        self.request(&uri, Method::PUT, Body::Json(body)).await
    }

    /// Deletes a resource. Some endpoints take a body on delete, hence the optional config.
    #[tracing::instrument(skip(self, config), fields(uri = %self.uri))]
    pub async fn delete(&self, name: &str, config: Option<&ConfigSource>) -> Result<Value> {
        self.check_allowed(Operation::Delete)?;
        let uri = self.resource_uri(name)?;
        let body = match config {
            Some(config) => Body::Json(config.resolve(&self.runtime)?),
            None => Body::Empty,
        };
        self.request(&uri, Method::DELETE, body).await
    }

    fn check_allowed(&self, operation: Operation) -> Result<()> {
        if self.allows(operation) {
            Ok(())
        } else {
            Err(SdkError::configuration(format!(
                "Method not allowed: {} on {}",
                operation, self.uri
            )))
        }
    }

    fn resource_uri(&self, name: &str) -> Result<String> {
        if name.trim().is_empty() {
            return Err(SdkError::configuration("Resource name must be provided"));
        }
        Ok(format!("{}/{}", self.uri.trim_end_matches('/'), name))
    }

    async fn request(&self, uri: &str, method: Method, body: Body) -> Result<Value> {
        let mut options = RequestOptions::new(method);
        options.body = body;

        let (response, status) = self.client.make_request_advanced(uri, options).await?;
        if status != StatusCode::ACCEPTED.as_u16() {
            return Ok(response);
        }

        let link = response["selfLink"].as_str().ok_or_else(|| {
            SdkError::new(ErrorKind::Unknown, "202 response did not include a selfLink")
        })?;
        self.wait_for_task(link).await
    }

    async fn wait_for_task(&self, link: &str) -> Result<Value> {
        let path = task_path(link)?;
        debug!("Waiting for task {}", path);

        let response = self
            .polling
            .retry(
                &format!("task {}", path),
                |e: &SdkError| e.kind().is_retryable(),
                || self.poll_task(&path),
            )
            .await?;

        info!("Task {} finished", path);
        Ok(response)
    }

    async fn poll_task(&self, path: &str) -> Result<Value> {
        let (response, status) = self
            .client
            .make_request_advanced(path, RequestOptions::get())
            .await?;

        if status != StatusCode::OK.as_u16() {
            return Err(SdkError::new(
                ErrorKind::Transient,
                format!("Task not complete: status code {}", status),
            ));
        }

        match response.get("status").and_then(Value::as_str) {
            None | Some("FINISHED") => Ok(response),
            Some("FAILED") => Err(SdkError::new(
                ErrorKind::Fatal,
                format!(
                    "Task failed: {}",
                    response["errorMessage"].as_str().unwrap_or("no error message")
                ),
            )),
            Some(other) => Err(SdkError::new(
                ErrorKind::Transient,
                format!("Task not complete: status {}", other),
            )),
        }
    }
}

/// Devices report `selfLink` as `https://localhost/...`; only the path is usable.
fn task_path(link: &str) -> Result<String> {
    if link.starts_with('/') {
        return Ok(link.to_string());
    }
    let url = Url::parse(link).map_err(|e| {
        SdkError::new(ErrorKind::Unknown, format!("Invalid task link: {}", link)).with_cause(e)
    })?;
    Ok(url.path().to_string())
}
