//! Extension (iControl LX) package management on BIG-IP.
//!
//! Packages are RPMs. Installing one means uploading it to the device in chunks and
//! then starting an INSTALL task that reads it from the device's download directory.
//! Every operation runs as a package-management task that has to be polled.

use std::path::Path;
use std::sync::LazyLock;

use log::{debug, info, warn};
use regex::Regex;
use reqwest::{Method, Url};
use serde_json::{Value, json};

use crate::client::{ManagementClient, RequestOptions};
use crate::error::{ErrorKind, Result, SdkError};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::runtime::{RealRuntime, Runtime};

pub const PACKAGE_MANAGEMENT_URI: &str = "/mgmt/shared/iapp/package-management-tasks";

pub const UPLOAD_URI: &str = "/mgmt/shared/file-transfer/uploads";

/// Where uploaded files land on the device.
pub const REMOTE_DOWNLOAD_DIR: &str = "/var/config/rest/downloads";

/// Upload chunk size (1 MiB).
pub const CHUNK_SIZE: usize = 1024 * 1024;

pub const TASK_POLL_ATTEMPTS: u32 = 120;
pub const TASK_POLL_INTERVAL_SECS: f64 = 1.0;

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9]+\.[0-9]+\.[0-9]+").expect("Failed to compile package version regex")
});

/// Result of a package query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackageStatus {
    pub installed: bool,
    /// `N.N.N` taken from the package name, if it carries one
    pub version: Option<String>,
}

pub struct PackageClient<R: Runtime = RealRuntime> {
    client: ManagementClient,
    polling: RetryPolicy,
    runtime: R,
}

impl PackageClient<RealRuntime> {
    pub fn new(client: ManagementClient) -> Self {
        Self::with_runtime(client, RealRuntime)
    }
}

impl<R: Runtime> PackageClient<R> {
    pub fn with_runtime(client: ManagementClient, runtime: R) -> Self {
        Self {
            client,
            polling: RetryPolicy::polling(TASK_POLL_ATTEMPTS, TASK_POLL_INTERVAL_SECS),
            runtime,
        }
    }

    /// Replaces the task polling schedule.
    pub fn with_polling(mut self, config: RetryConfig) -> Result<Self> {
        self.polling = RetryPolicy::new(config)?;
        Ok(self)
    }

    /// Queries installed packages for exactly one whose name contains `fragment`.
    #[tracing::instrument(skip(self))]
    pub async fn is_installed(&self, fragment: &str) -> Result<PackageStatus> {
        let response = self.run_task(json!({"operation": "QUERY"})).await?;

        let names: Vec<&str> = response["queryResponse"]
            .as_array()
            .map(|packages| {
                packages
                    .iter()
                    .filter_map(|p| p["packageName"].as_str())
                    .filter(|name| name.contains(fragment))
                    .collect()
            })
            .unwrap_or_default();

        match names.as_slice() {
            [name] => {
                debug!("Found installed package {}", name);
                Ok(PackageStatus {
                    installed: true,
                    version: version_from_package_name(name),
                })
            }
            [] => Ok(PackageStatus::default()),
            _ => {
                warn!(
                    "{} installed packages match '{}', treating as not installed",
                    names.len(),
                    fragment
                );
                Ok(PackageStatus::default())
            }
        }
    }

    /// Downloads a package and installs it on the device. The local copy is
    /// removed afterwards, whether or not the install succeeded.
    #[tracing::instrument(skip(self))]
    pub async fn install(&self, download_url: &str) -> Result<()> {
        let name = package_file_name(download_url)?;

        let contents = self.client.download(download_url).await?;
        let temp_file = self.runtime.temp_dir().join(&name);
        self.runtime.write(&temp_file, &contents).map_err(|e| {
            SdkError::new(
                ErrorKind::Unknown,
                format!("Failed to save package to {}", temp_file.display()),
            )
            .with_cause(e)
        })?;

        let result = self.install_file(&temp_file).await;

        if let Err(e) = self.runtime.remove_file(&temp_file) {
            warn!("Failed to remove {}: {:#}", temp_file.display(), e);
        }
        result
    }

    /// Uploads a local package file and installs it.
    #[tracing::instrument(skip(self))]
    pub async fn install_file(&self, path: &Path) -> Result<()> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                SdkError::configuration(format!("Invalid package path: {}", path.display()))
            })?;
        let contents = self.runtime.read(path).map_err(|e| {
            SdkError::configuration(format!("Failed to read package {}", path.display()))
                .with_cause(e)
        })?;

        self.upload(name, &contents).await?;

        let remote_path = format!("{}/{}", REMOTE_DOWNLOAD_DIR, name);
        self.run_task(json!({
            "operation": "INSTALL",
            "packageFilePath": remote_path,
        }))
        .await?;

        info!("Installed package {}", name);
        Ok(())
    }

    /// Uninstalls an installed package by its full package name.
    #[tracing::instrument(skip(self))]
    pub async fn uninstall(&self, package_name: &str) -> Result<()> {
        if package_name.trim().is_empty() {
            return Err(SdkError::configuration("Package name must be provided"));
        }

        self.run_task(json!({
            "operation": "UNINSTALL",
            "packageName": package_name,
        }))
        .await?;

        info!("Uninstalled package {}", package_name);
        Ok(())
    }

    async fn upload(&self, name: &str, contents: &[u8]) -> Result<()> {
        if contents.is_empty() {
            return Err(SdkError::configuration(format!(
                "Package {} is empty",
                name
            )));
        }

        let uri = format!("{}/{}", UPLOAD_URI, name);
        let total = contents.len();
        for (index, chunk) in contents.chunks(CHUNK_SIZE).enumerate() {
            let start = index * CHUNK_SIZE;
            let end = start + chunk.len() - 1;
            let options = RequestOptions::new(Method::POST)
                .header("Content-Type", "application/octet-stream")
                .header("Content-Range", format!("{}-{}/{}", start, end, total))
                .raw(chunk.to_vec());

            self.client.make_request(&uri, options).await?;
            debug!("Uploaded {} bytes {}-{}/{}", name, start, end, total);
        }
        Ok(())
    }

    /// Starts a package-management task and waits for it to finish.
    async fn run_task(&self, body: Value) -> Result<Value> {
        let response = self
            .client
            .make_request(PACKAGE_MANAGEMENT_URI, RequestOptions::post(body))
            .await?;
        let id = response["id"].as_str().ok_or_else(|| {
            SdkError::new(
                ErrorKind::Unknown,
                "Package management response did not include a task id",
            )
        })?;

        let uri = format!("{}/{}", PACKAGE_MANAGEMENT_URI, id);
        self.polling
            .retry(
                &format!("package task {}", id),
                |e: &SdkError| e.kind().is_retryable(),
                || self.check_task(&uri),
            )
            .await
    }

    async fn check_task(&self, uri: &str) -> Result<Value> {
        let response = self.client.make_request(uri, RequestOptions::get()).await?;

        match response["status"].as_str() {
            Some("FINISHED") => Ok(response),
            Some("FAILED") => Err(SdkError::new(
                ErrorKind::Fatal,
                format!(
                    "Package task failed: {}",
                    response["errorMessage"].as_str().unwrap_or("no error message")
                ),
            )),
            status => Err(SdkError::new(
                ErrorKind::Transient,
                format!("Package task not complete: {}", status.unwrap_or("no status")),
            )),
        }
    }
}

/// Last path segment of the download URL; query and fragment are dropped.
fn package_file_name(download_url: &str) -> Result<String> {
    let url = Url::parse(download_url).map_err(|e| {
        SdkError::configuration(format!("Invalid download URL: {}", download_url)).with_cause(e)
    })?;
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            SdkError::configuration(format!(
                "Download URL does not name a package file: {}",
                download_url
            ))
        })
}

fn version_from_package_name(name: &str) -> Option<String> {
    VERSION_PATTERN.find(name).map(|m| m.as_str().to_string())
}
