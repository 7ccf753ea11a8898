//! SSH adapter built on russh. Opens a fresh session per attempt.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use russh::client::{self, Handle};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key, ssh_key};
use russh::{ChannelMsg, Disconnect};

use super::{AttemptResult, CommandOutput, Failure, FailureTag, Payload, Transport};
use crate::invocation::{Invocation, Request, SshAuth, SshCommand, SshTarget};

/// Accepts the device host key. Management addresses of freshly provisioned devices
/// are not present in any known-hosts store.
struct DeviceHandler {
    host: String,
}

impl client::Handler for DeviceHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            "Accepting {} host key for {}",
            server_public_key.algorithm(),
            self.host
        );
        Ok(true)
    }
}

/// Single-attempt SSH command transport.
#[derive(Clone)]
pub struct SshTransport {
    config: Arc<client::Config>,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new(client::Config::default())
    }
}

impl SshTransport {
    pub fn new(config: client::Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    async fn run(&self, command: &SshCommand) -> AttemptResult {
        let target = &command.target;
        let handler = DeviceHandler {
            host: target.host.clone(),
        };

        let mut session = client::connect(
            self.config.clone(),
            (target.host.as_str(), target.port),
            handler,
        )
        .await
        .map_err(|e| {
            Failure::new(
                FailureTag::Connection,
                format!("Failed to connect to {}:{}", target.host, target.port),
            )
            .with_cause(e)
        })?;

        authenticate(&mut session, target).await?;

        let output = exec(&session, &command.command).await;
        if let Err(e) = session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("Ignoring SSH disconnect error: {}", e);
        }
        let output = output?;

        debug!(
            "ssh {}@{}: `{}` exited with {}",
            target.user, target.host, command.command, output.exit_code
        );

        if output.exit_code == 0 {
            Ok(Payload::Ssh(output))
        } else {
            Err(Failure::new(
                FailureTag::SshExit {
                    code: output.exit_code,
                    stderr: output.stderr.clone(),
                },
                format!(
                    "`{}` exited with status {}",
                    command.command, output.exit_code
                ),
            ))
        }
    }
}

async fn authenticate(
    session: &mut Handle<DeviceHandler>,
    target: &SshTarget,
) -> Result<(), Failure> {
    let exchange_failed = |e: russh::Error| {
        Failure::new(FailureTag::Connection, "SSH authentication exchange failed").with_cause(e)
    };

    let result = match &target.auth {
        SshAuth::Password(password) => session
            .authenticate_password(target.user.clone(), password.clone())
            .await
            .map_err(exchange_failed)?,
        SshAuth::KeyFile { path, passphrase } => {
            let key = load_secret_key(path, passphrase.as_deref()).map_err(|e| {
                Failure::new(
                    FailureTag::InvalidRequest,
                    format!("Failed to load private key {}", path.display()),
                )
                .with_cause(e)
            })?;
            let hash_alg = session
                .best_supported_rsa_hash()
                .await
                .map_err(exchange_failed)?
                .flatten();
            session
                .authenticate_publickey(
                    target.user.clone(),
                    PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                )
                .await
                .map_err(exchange_failed)?
        }
    };

    if result.success() {
        Ok(())
    } else {
        Err(Failure::new(
            FailureTag::SshAuth,
            format!("SSH authentication rejected for user {}", target.user),
        ))
    }
}

async fn exec(session: &Handle<DeviceHandler>, command: &str) -> Result<CommandOutput, Failure> {
    let channel_failed = |e: russh::Error| {
        Failure::new(FailureTag::Connection, "SSH channel failed").with_cause(e)
    };

    let mut channel = session
        .channel_open_session()
        .await
        .map_err(channel_failed)?;
    channel.exec(true, command).await.map_err(channel_failed)?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_code = None;

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
            // ext 1 is SSH_EXTENDED_DATA_STDERR
            ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
            ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
            _ => {}
        }
    }

    let Some(exit_code) = exit_code else {
        return Err(Failure::new(
            FailureTag::Other,
            format!("`{}`: channel closed without an exit status", command),
        ));
    };

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code,
    })
}

#[async_trait]
impl Transport for SshTransport {
    #[tracing::instrument(skip(self, invocation), fields(target = %invocation))]
    async fn execute(&self, invocation: &Invocation) -> AttemptResult {
        let Request::Ssh(command) = invocation.request() else {
            return Err(Failure::new(
                FailureTag::InvalidRequest,
                format!("SSH transport cannot execute {}", invocation),
            ));
        };

        match tokio::time::timeout(invocation.timeout(), self.run(command)).await {
            Ok(result) => result,
            Err(elapsed) => Err(Failure::new(
                FailureTag::Timeout,
                format!(
                    "{} timed out after {}ms",
                    invocation,
                    invocation.timeout().as_millis()
                ),
            )
            .with_cause(elapsed)),
        }
    }
}
