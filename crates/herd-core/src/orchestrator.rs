//! Fleet-wide execution
//!
//! A run moves through `Filtering -> (DryRun | Dispatching) -> Collecting -> Done`:
//! hosts are filtered, then either previewed or handed to one task each, and the
//! collector folds their outcomes into a single result.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cancel::Cancellation;
use crate::config::{InvocationConfig, Operation};
use crate::dispatch::{DispatcherFactory, SshDispatcherFactory};
use crate::filter::filter_hosts;
use crate::outcome::{HostOutcome, RunSummary};
use crate::output::{Reporter, render};

/// Runs one invocation against every selected host
pub struct Orchestrator {
    config: Arc<InvocationConfig>,
    reporter: Arc<Reporter>,
    factory: Arc<dyn DispatcherFactory>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator reporting to stdout/stderr and dispatching over SSH
    #[must_use]
    pub fn new(config: InvocationConfig) -> Self {
        Self {
            config: Arc::new(config),
            reporter: Arc::new(Reporter::stdio()),
            factory: Arc::new(SshDispatcherFactory),
        }
    }

    /// Send output somewhere other than stdout/stderr
    #[must_use]
    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    /// Replace how hosts are contacted
    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn DispatcherFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Run and return the aggregate result
    pub async fn run(&self, cancel: &Cancellation) -> bool {
        self.execute(cancel).await.success()
    }

    /// Run and return every collected outcome
    pub async fn execute(&self, cancel: &Cancellation) -> RunSummary {
        let hosts = filter_hosts(&self.config.hosts, &self.config.include, &self.config.exclude);
        info!(
            total = self.config.hosts.len(),
            selected = hosts.len(),
            "filtered hosts"
        );

        if self.config.dry_run {
            self.preview(&hosts).await;
            return RunSummary::default();
        }

        self.dispatch(hosts, cancel).await
    }

    async fn preview(&self, hosts: &[String]) {
        self.reporter
            .diagnostic("DRY-RUN: Previewing operations (no actual execution)")
            .await;

        for host in hosts {
            let line = match &self.config.operation {
                Operation::Command { command } => {
                    format!("DRY-RUN: Would execute on {host}: {command}\n")
                }
                Operation::Copy {
                    source,
                    destination,
                    recursive,
                } => format!(
                    "DRY-RUN: Would copy {}{} to {host}:{}\n",
                    if *recursive { "(recursive) " } else { "" },
                    source.display(),
                    destination.display()
                ),
            };
            self.reporter.emit(&line).await;
        }
    }

    async fn dispatch(&self, hosts: Vec<String>, cancel: &Cancellation) -> RunSummary {
        let dispatched = hosts.len();
        let dispatcher = self.factory.create(Arc::clone(&self.config)).await;
        let format = self.config.output_format;

        // sized so no sender ever waits, even when nobody is collecting any more
        let (tx, mut rx) = mpsc::channel::<HostOutcome>(dispatched.max(1));

        for host in hosts {
            let tx = tx.clone();
            let dispatcher = Arc::clone(&dispatcher);
            let reporter = Arc::clone(&self.reporter);
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let outcome = if cancel.is_cancelled() {
                    debug!(host = %host, "cancelled before start");
                    HostOutcome::failure(&host, "", "cancelled")
                } else {
                    dispatcher.dispatch(&host).await
                };

                reporter.emit(&render(format, &outcome)).await;
                if tx.send(outcome).await.is_err() {
                    debug!(host = %host, "collector gone, dropping outcome");
                }
            });
        }
        drop(tx);

        let mut summary = RunSummary {
            outcomes: Vec::with_capacity(dispatched),
            dispatched,
            cancelled: false,
        };

        while summary.outcomes.len() < dispatched {
            tokio::select! {
                () = cancel.cancelled() => {
                    warn!(
                        pending = dispatched - summary.outcomes.len(),
                        "run cancelled, not waiting for remaining hosts"
                    );
                    tokio::spawn(async move { while rx.recv().await.is_some() {} });
                    summary.cancelled = true;
                    return summary;
                }
                received = rx.recv() => match received {
                    Some(outcome) => summary.outcomes.push(outcome),
                    None => {
                        warn!("host task ended without reporting");
                        break;
                    }
                }
            }
        }

        info!(
            total = dispatched,
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            "run finished"
        );
        summary
    }
}
