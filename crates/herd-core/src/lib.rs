//! herd-core: Fleet orchestration
//!
//! Filters the host list, fans one task out per host, and folds the per-host
//! outcomes into a single success flag.

pub mod cancel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod orchestrator;
pub mod outcome;
pub mod output;

pub use cancel::Cancellation;
pub use config::{InvocationConfig, InvocationConfigBuilder, Operation, OutputFormat};
pub use dispatch::{DispatcherFactory, HostDispatcher, SshDispatcher, SshDispatcherFactory};
pub use error::CoreError;
pub use filter::{filter_hosts, glob_match};
pub use orchestrator::Orchestrator;
pub use outcome::{HostOutcome, RunSummary};
pub use output::{Reporter, render};

/// Run `config` against its hosts, reporting to stdout and stderr
///
/// Returns `true` only if every selected host succeeded and the run was not cancelled.
pub async fn run(config: InvocationConfig, cancel: &Cancellation) -> bool {
    Orchestrator::new(config).run(cancel).await
}
