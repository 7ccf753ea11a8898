//! Client SDK for F5 BIG-IP and BIG-IQ devices.
//!
//! Every remote call, REST or SSH, goes through the same pipeline: an
//! [`Invocation`](invocation::Invocation) is executed by a
//! [`Transport`](transport::Transport), retried by a [`RetryPolicy`](retry::RetryPolicy)
//! while failures are transient, and the final outcome is mapped onto an
//! [`ErrorKind`] by the [`normalize`](normalize::normalize) step.
//!
//! ```no_run
//! use f5sdk::{ClientConfig, ManagementClient};
//!
//! # async fn run() -> f5sdk::Result<()> {
//! let config = ClientConfig::builder("192.0.2.10")
//!     .basic_auth("admin", "admin")
//!     .build()?;
//! let client = ManagementClient::connect(config).await?;
//! println!("BIG-IP version {}", client.get_info().await?.version);
//! # Ok(())
//! # }
//! ```

pub mod bigip;
pub mod bigiq;
pub mod client;
pub mod config;
pub mod error;
pub mod feature;
pub mod invocation;
pub mod normalize;
pub mod retry;
pub mod runtime;
pub mod transport;

pub use client::{DeviceInfo, ManagementClient, RequestOptions};
pub use config::{ClientConfig, Credentials, Scheme};
pub use error::{ErrorKind, Result, SdkError};
pub use retry::{RetryConfig, RetryPolicy};

/// Shared fixtures for unit tests.
#[cfg(test)]
pub mod test_utils {
    use crate::client::ManagementClient;
    use crate::config::{ClientConfig, ClientConfigBuilder, Scheme};
    use crate::retry::RetryConfig;

    /// Retry config with millisecond delays so exhaustion tests stay fast.
    pub fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: 0.001,
            backoff_multiplier: 2.0,
            max_delay: 0.005,
            jitter: false,
        }
    }

    /// Config builder pointed at a mockito server over plain HTTP.
    pub fn server_config(server: &mockito::Server) -> ClientConfigBuilder {
        let address = server.socket_address();
        ClientConfig::builder(address.ip().to_string())
            .port(address.port())
            .scheme(Scheme::Http)
            .retry(fast_retry(3))
    }

    /// Client with a preset token, so no login request is made.
    pub async fn token_client(server: &mockito::Server) -> ManagementClient {
        let config = server_config(server).token("test-token").build().unwrap();
        ManagementClient::connect(config).await.unwrap()
    }
}
