//! SSH transport using russh crate

use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Msg};
use russh::keys::PrivateKeyWithHashAlg;
use russh::keys::agent::client::AgentClient;
use russh::keys::ssh_key;
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::error::ExecError;
use crate::keys::{Signer, SignerSet};
use crate::result::ConnectionInfo;
use crate::trust::HostKeyPolicy;

/// SSH client handler for russh
///
/// Defers host key decisions to the run's `HostKeyPolicy`.
#[derive(Debug)]
pub struct SshClientHandler {
    host: String,
    port: u16,
    policy: Arc<HostKeyPolicy>,
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        match self.policy.verify(&self.host, self.port, server_public_key) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(host = %self.host, error = %e, "rejecting server key");
                Ok(false)
            }
        }
    }
}

/// Opens authenticated sessions with the run's shared signers and trust policy
#[derive(Debug, Clone)]
pub struct SshConnector {
    signers: Arc<SignerSet>,
    policy: Arc<HostKeyPolicy>,
    connect_timeout: Duration,
}

impl SshConnector {
    /// Create a connector
    ///
    /// `connect_timeout` bounds dial, handshake and authentication, not the work done afterwards.
    #[must_use]
    pub fn new(
        signers: Arc<SignerSet>,
        policy: Arc<HostKeyPolicy>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            signers,
            policy,
            connect_timeout,
        }
    }

    /// Connect and authenticate to a host
    ///
    /// # Errors
    /// Returns `ExecError` if dialing, the host key check, or authentication fails,
    /// or if all of it does not finish within the connect timeout
    #[instrument(skip(self), fields(host = %conn_info.host))]
    pub async fn connect(&self, conn_info: &ConnectionInfo) -> Result<SshSession, ExecError> {
        match timeout(self.connect_timeout, self.establish(conn_info)).await {
            Ok(result) => result,
            Err(_) => Err(ExecError::Timeout {
                timeout: self.connect_timeout,
            }),
        }
    }

    async fn establish(&self, conn_info: &ConnectionInfo) -> Result<SshSession, ExecError> {
        info!(
            host = %conn_info.host,
            port = conn_info.port,
            user = %conn_info.user,
            "connecting to SSH"
        );

        let config = Arc::new(client::Config::default());
        let handler = SshClientHandler {
            host: conn_info.host.clone(),
            port: conn_info.port,
            policy: Arc::clone(&self.policy),
        };

        let mut handle = client::connect(config, (conn_info.host.as_str(), conn_info.port), handler)
            .await
            .map_err(|e| match e {
                russh::Error::UnknownKey => ExecError::HostKeyRejected(format!(
                    "{} presented an untrusted key",
                    conn_info.host
                )),
                other => ExecError::ConnectionFailed(other.to_string()),
            })?;

        self.authenticate(&mut handle, &conn_info.user).await?;

        info!(host = %conn_info.host, "SSH connected and authenticated");

        Ok(SshSession {
            handle,
            host: conn_info.host.clone(),
        })
    }

    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        user: &str,
    ) -> Result<(), ExecError> {
        if self.signers.is_empty() {
            return Err(ExecError::AuthenticationFailed(
                "no authentication method available".to_string(),
            ));
        }

        for signer in self.signers.iter() {
            let hash_alg = handle
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();

            let accepted = match signer {
                Signer::Key { key, .. } => handle
                    .authenticate_publickey(
                        user,
                        PrivateKeyWithHashAlg::new(Arc::clone(key), hash_alg),
                    )
                    .await
                    .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?
                    .success(),
                Signer::Agent { socket, public_key } => {
                    let mut agent = match AgentClient::connect_uds(socket).await {
                        Ok(agent) => agent,
                        Err(e) => {
                            warn!(error = %e, "SSH agent unreachable, skipping agent identity");
                            continue;
                        }
                    };
                    match handle
                        .authenticate_publickey_with(user, public_key.clone(), hash_alg, &mut agent)
                        .await
                    {
                        Ok(result) => result.success(),
                        Err(e) => {
                            warn!(error = %e, "agent signing failed");
                            false
                        }
                    }
                }
            };

            if accepted {
                debug!(signer = %signer.describe(), "authenticated");
                return Ok(());
            }
            debug!(signer = %signer.describe(), "identity rejected by server");
        }

        Err(ExecError::AuthenticationFailed(
            "server rejected every offered identity".to_string(),
        ))
    }
}

/// An authenticated SSH connection to one host
pub struct SshSession {
    handle: client::Handle<SshClientHandler>,
    host: String,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl SshSession {
    /// Open a session channel and start `cmd` on it
    ///
    /// # Errors
    /// Returns `ExecError::Session` if the channel cannot be opened or the exec request fails
    pub async fn exec(&self, cmd: &str) -> Result<Channel<Msg>, ExecError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ExecError::Session(e.to_string()))?;

        debug!(host = %self.host, command = %cmd, "starting remote command");

        channel
            .exec(true, cmd)
            .await
            .map_err(|e| ExecError::Session(e.to_string()))?;

        Ok(channel)
    }

    /// Disconnect from remote host
    ///
    /// # Errors
    /// Returns `ExecError::Session` if disconnection fails
    pub async fn disconnect(self) -> Result<(), ExecError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| ExecError::Session(e.to_string()))?;
        info!(host = %self.host, "SSH disconnected");
        Ok(())
    }
}

/// Everything a channel produced before it closed
#[derive(Debug, Default)]
pub struct ChannelOutput {
    /// Exit status, if the server sent one
    pub exit_status: Option<u32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Drain a channel until the server closes it
pub async fn collect_output(mut channel: Channel<Msg>) -> ChannelOutput {
    let mut output = ChannelOutput::default();

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => {
                output.stdout.extend_from_slice(&data);
            }
            ChannelMsg::ExtendedData { data, ext } => {
                if ext == 1 {
                    // stderr
                    output.stderr.extend_from_slice(&data);
                }
            }
            ChannelMsg::ExitStatus { exit_status } => {
                output.exit_status = Some(exit_status);
            }
            _ => {}
        }
    }

    output
}
