//! Per-host operation dispatch

use std::sync::Arc;

use async_trait::async_trait;
use herd_exec::{
    ConnectionInfo, CopyRequest, HostKeyPolicy, SshConnector, build_signers, copy_to_host,
    run_command,
};
use tracing::{error, info, instrument};

use crate::config::{InvocationConfig, Operation};
use crate::outcome::HostOutcome;

/// Output recorded for a completed copy
pub const COPY_FINISHED: &str = "Finished\n";

/// Performs the configured operation on a single host
#[async_trait]
pub trait HostDispatcher: Send + Sync {
    /// Run the operation against `host`; failures are reported in the outcome
    async fn dispatch(&self, host: &str) -> HostOutcome;
}

/// Factory trait for creating the dispatcher of a run
///
/// Invoked once per run, after filtering and only when hosts are actually contacted.
#[async_trait]
pub trait DispatcherFactory: Send + Sync {
    async fn create(&self, config: Arc<InvocationConfig>) -> Arc<dyn HostDispatcher>;
}

/// Default factory: dispatch over SSH
#[derive(Debug, Default)]
pub struct SshDispatcherFactory;

#[async_trait]
impl DispatcherFactory for SshDispatcherFactory {
    async fn create(&self, config: Arc<InvocationConfig>) -> Arc<dyn HostDispatcher> {
        Arc::new(SshDispatcher::new(config).await)
    }
}

/// Dispatches commands and copies over SSH
///
/// The signer set and host key policy are built once and shared by every host.
#[derive(Debug)]
pub struct SshDispatcher {
    config: Arc<InvocationConfig>,
    connector: SshConnector,
}

impl SshDispatcher {
    /// Build authentication and trust material for the run
    pub async fn new(config: Arc<InvocationConfig>) -> Self {
        let signers = build_signers(&config.key_path, &config.agent_socket, config.use_agent).await;
        let policy = HostKeyPolicy::new(&config.known_hosts, config.insecure_host);
        let connector = SshConnector::new(
            Arc::new(signers),
            Arc::new(policy),
            config.connect_timeout(),
        );

        Self { config, connector }
    }

    fn connection_info(&self, host: &str) -> ConnectionInfo {
        ConnectionInfo::new(host, &self.config.user).with_port(self.config.port)
    }
}

#[async_trait]
impl HostDispatcher for SshDispatcher {
    #[instrument(skip(self))]
    async fn dispatch(&self, host: &str) -> HostOutcome {
        let conn_info = self.connection_info(host);

        let outcome = match &self.config.operation {
            Operation::Command { command } => {
                match run_command(
                    &self.connector,
                    &conn_info,
                    command,
                    self.config.command_timeout(),
                )
                .await
                {
                    Ok(result) => HostOutcome::success(host, result.stdout),
                    Err(e) => HostOutcome::failure(host, e.partial_output().unwrap_or_default(), &e),
                }
            }
            Operation::Copy {
                source,
                destination,
                recursive,
            } => {
                let request = CopyRequest {
                    source: source.clone(),
                    destination: destination.clone(),
                    recursive: *recursive,
                    helper: self.config.copy_helper.clone(),
                    verbose: self.config.verbose,
                };
                match copy_to_host(&self.connector, &conn_info, &request).await {
                    Ok(()) => HostOutcome::success(host, COPY_FINISHED),
                    Err(e) => HostOutcome::failure(host, "", &e),
                }
            }
        };

        match &outcome.error {
            None => info!(host, "host finished"),
            Some(e) => error!(host, error = %e, "host failed"),
        }
        outcome
    }
}
