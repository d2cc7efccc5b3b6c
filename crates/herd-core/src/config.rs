//! Invocation configuration

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use herd_exec::DEFAULT_COPY_HELPER;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// What to do on every selected host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// Run a shell command
    Command { command: String },
    /// Copy a local file or directory to every host
    Copy {
        source: PathBuf,
        destination: PathBuf,
        #[serde(default)]
        recursive: bool,
    },
}

/// How per-host outcomes are rendered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            // yaml and table have no renderer of their own yet
            "text" | "yaml" | "table" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(CoreError::UnknownFormat(other.to_string())),
        }
    }
}

/// Fully resolved configuration for one run
///
/// Built once and shared read-only by every host task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationConfig {
    /// Candidate hosts, before pattern filtering
    #[serde(default)]
    pub hosts: Vec<String>,
    /// SSH user
    #[serde(default = "default_user")]
    pub user: String,
    /// SSH port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Private key file; empty to skip
    #[serde(default)]
    pub key_path: PathBuf,
    /// SSH agent socket
    #[serde(default)]
    pub agent_socket: PathBuf,
    /// Offer agent identities
    #[serde(default)]
    pub use_agent: bool,
    /// Base timeout in seconds, used for connecting unless overridden
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Connection timeout override in seconds
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    /// Command execution timeout in seconds
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    /// Operation to perform
    pub operation: Operation,
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Print intended actions without connecting
    #[serde(default)]
    pub dry_run: bool,
    /// Host include patterns
    #[serde(default)]
    pub include: Vec<String>,
    /// Host exclude patterns
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub verbose: bool,
    /// known_hosts file used for host key verification
    #[serde(default = "default_known_hosts")]
    pub known_hosts: PathBuf,
    /// Skip host key verification
    #[serde(default)]
    pub insecure_host: bool,
    /// scp binary checked locally and started remotely
    #[serde(default = "default_copy_helper")]
    pub copy_helper: PathBuf,
}

fn default_user() -> String {
    "root".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_timeout() -> u64 {
    5
}

fn default_copy_helper() -> PathBuf {
    PathBuf::from(DEFAULT_COPY_HELPER)
}

/// `~/.ssh/known_hosts` of the current user
#[must_use]
pub fn default_known_hosts() -> PathBuf {
    expand_home(Path::new("~/.ssh/known_hosts"))
}

/// Replace a leading `~` with the home directory
#[must_use]
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

impl InvocationConfig {
    /// Start building a configuration for `operation`
    #[must_use]
    pub fn builder(operation: Operation) -> InvocationConfigBuilder {
        InvocationConfigBuilder::new(operation)
    }

    /// Timeout for dialing, handshake and authentication
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.unwrap_or(self.timeout_secs))
    }

    /// Timeout for the remote command, if any
    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    /// Returns `CoreError::ConfigError` describing the first problem found
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.port == 0 {
            return Err(CoreError::ConfigError("port must be non-zero".to_string()));
        }
        match &self.operation {
            Operation::Command { command } if command.trim().is_empty() => Err(
                CoreError::ConfigError("no command given".to_string()),
            ),
            Operation::Copy {
                source,
                destination,
                ..
            } if source.as_os_str().is_empty() || destination.as_os_str().is_empty() => Err(
                CoreError::ConfigError("copy needs both a source and a destination".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// Builder for `InvocationConfig`
#[derive(Debug, Clone)]
pub struct InvocationConfigBuilder {
    config: InvocationConfig,
}

impl InvocationConfigBuilder {
    /// Create builder with defaults for everything but the operation
    #[must_use]
    pub fn new(operation: Operation) -> Self {
        Self {
            config: InvocationConfig {
                hosts: Vec::new(),
                user: default_user(),
                port: default_port(),
                key_path: PathBuf::new(),
                agent_socket: PathBuf::new(),
                use_agent: false,
                timeout_secs: default_timeout(),
                connect_timeout_secs: None,
                command_timeout_secs: None,
                operation,
                output_format: OutputFormat::default(),
                dry_run: false,
                include: Vec::new(),
                exclude: Vec::new(),
                verbose: false,
                known_hosts: default_known_hosts(),
                insecure_host: false,
                copy_helper: default_copy_helper(),
            },
        }
    }

    #[must_use]
    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.config.user = user.into();
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set SSH key path; a leading `~` is expanded
    #[must_use]
    pub fn with_key_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.key_path = expand_home(path.as_ref());
        self
    }

    /// Use the SSH agent listening on `socket`
    #[must_use]
    pub fn with_agent(mut self, socket: impl Into<PathBuf>) -> Self {
        self.config.agent_socket = socket.into();
        self.config.use_agent = true;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn with_command_timeout(mut self, secs: u64) -> Self {
        self.config.command_timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.config.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn with_include(mut self, patterns: Vec<String>) -> Self {
        self.config.include = patterns;
        self
    }

    #[must_use]
    pub fn with_exclude(mut self, patterns: Vec<String>) -> Self {
        self.config.exclude = patterns;
        self
    }

    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    /// Set known_hosts path; a leading `~` is expanded
    #[must_use]
    pub fn with_known_hosts(mut self, path: impl AsRef<Path>) -> Self {
        self.config.known_hosts = expand_home(path.as_ref());
        self
    }

    #[must_use]
    pub fn with_insecure_host(mut self, insecure: bool) -> Self {
        self.config.insecure_host = insecure;
        self
    }

    #[must_use]
    pub fn with_copy_helper(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.copy_helper = path.into();
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// Returns `CoreError::ConfigError` if the configuration is unusable
    pub fn build(self) -> Result<InvocationConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
