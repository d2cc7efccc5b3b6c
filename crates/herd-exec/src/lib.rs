//! herd-exec: Remote execution over SSH
//!
//! Provides the SSH transport, signer and host key handling, remote command execution,
//! and the writer side of the scp sink protocol

pub mod command;
pub mod copy;
pub mod error;
pub mod keys;
pub mod result;
pub mod sink;
pub mod ssh;
pub mod trust;

pub use command::run_command;
pub use copy::{CopyRequest, DEFAULT_COPY_HELPER, copy_to_host};
pub use error::ExecError;
pub use keys::{KeyError, Signer, SignerSet, build_signers};
pub use result::{CommandResult, ConnectionInfo};
pub use sink::SinkWriter;
pub use ssh::{SshConnector, SshSession};
pub use trust::{HostKeyPolicy, KnownHostsError, KnownHostsFile};
