//! herd CLI
//!
//! Runs a command or copies files across many servers over SSH

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use herd_core::{Cancellation, InvocationConfig, Operation, OutputFormat};
use tracing_subscriber::EnvFilter;

mod config;

use config::FileConfig;

#[derive(Parser)]
#[command(name = "herd", version)]
#[command(about = "Run commands or copy files across multiple servers over SSH", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Config file (default is ~/.config/herd/herd.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Hosts to run on, comma separated
    #[arg(short, long, value_delimiter = ',', global = true)]
    machines: Vec<String>,

    /// SSH port to connect to
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// User to connect as
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// SSH key to use for authentication, full path
    #[arg(short, long, global = true)]
    key: Option<PathBuf>,

    /// Use the SSH agent for authentication
    #[arg(short = 'a', long, global = true)]
    useagent: bool,

    /// SSH agent socket
    #[arg(short = 's', long, global = true)]
    agentsock: Option<PathBuf>,

    /// Timeout in seconds
    #[arg(short, long, global = true)]
    timeout: Option<u64>,

    /// Connection timeout override in seconds
    #[arg(long, global = true)]
    connect_timeout: Option<u64>,

    /// Command execution timeout in seconds
    #[arg(long, global = true)]
    command_timeout: Option<u64>,

    /// Output format: text or json
    #[arg(short, long, global = true)]
    output_format: Option<String>,

    /// Preview operations without executing
    #[arg(short = 'n', long, global = true)]
    dry_run: bool,

    /// Host patterns to match
    #[arg(short = 'H', long = "host", value_delimiter = ',', global = true)]
    host_patterns: Vec<String>,

    /// Host patterns to exclude
    #[arg(long = "host-exclude", value_delimiter = ',', global = true)]
    host_excludes: Vec<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// known_hosts file for host key verification
    #[arg(long, global = true)]
    known_hosts: Option<PathBuf>,

    /// Skip host key verification (not recommended)
    #[arg(long, global = true)]
    insecure_host: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command across multiple servers
    Ssh {
        /// Command to run
        #[arg(short, long)]
        command: String,
    },
    /// Copy a file or directory to multiple servers
    Scp {
        /// Local source file or directory
        #[arg(long)]
        src: PathBuf,
        /// Remote destination
        #[arg(long)]
        dst: PathBuf,
        /// Copy directories recursively
        #[arg(short, long)]
        recursive: bool,
    },
}

fn default_user() -> String {
    std::env::var("LOGNAME")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "root".to_string())
}

fn default_key() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".ssh/id_rsa"))
        .unwrap_or_default()
}

/// Merge flags over the config file over defaults
fn build_config(cli: Cli, file: FileConfig) -> Result<InvocationConfig> {
    let args = cli.global;

    let operation = match cli.command {
        Commands::Ssh { command } => Operation::Command { command },
        Commands::Scp {
            src,
            dst,
            recursive,
        } => Operation::Copy {
            source: src,
            destination: dst,
            recursive,
        },
    };

    let machines = if args.machines.is_empty() {
        file.machines
    } else {
        args.machines
    };
    let include = if args.host_patterns.is_empty() {
        file.host_patterns
    } else {
        args.host_patterns
    };
    let exclude = if args.host_excludes.is_empty() {
        file.host_excludes
    } else {
        args.host_excludes
    };

    let output_format = match args.output_format.or(file.output_format) {
        Some(name) => name.parse::<OutputFormat>()?,
        None => OutputFormat::Text,
    };

    let mut builder = InvocationConfig::builder(operation)
        .with_hosts(machines)
        .with_user(args.user.or(file.user).unwrap_or_else(default_user))
        .with_port(args.port.or(file.port).unwrap_or(22))
        .with_key_path(args.key.or(file.key).unwrap_or_else(default_key))
        .with_timeout(args.timeout.or(file.timeout).unwrap_or(5))
        .with_output_format(output_format)
        .with_dry_run(args.dry_run)
        .with_include(include)
        .with_exclude(exclude)
        .with_verbose(args.verbose)
        .with_insecure_host(args.insecure_host || file.insecure_host.unwrap_or(false));

    if args.useagent || file.useagent.unwrap_or(false) {
        let socket = args
            .agentsock
            .or(file.agentsock)
            .or_else(|| std::env::var_os("SSH_AUTH_SOCK").map(PathBuf::from))
            .unwrap_or_default();
        builder = builder.with_agent(socket);
    }
    if let Some(secs) = args.connect_timeout.or(file.connect_timeout) {
        builder = builder.with_connect_timeout(secs);
    }
    if let Some(secs) = args.command_timeout.or(file.command_timeout) {
        builder = builder.with_command_timeout(secs);
    }
    if let Some(path) = args.known_hosts.or(file.known_hosts) {
        builder = builder.with_known_hosts(path);
    }
    if let Some(path) = file.copy_helper {
        builder = builder.with_copy_helper(path);
    }

    Ok(builder.build()?)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let default_level = if cli.global.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let file = FileConfig::load_or_default(cli.global.config.as_deref())?;
    let config = build_config(cli, file)?;

    let cancel = Cancellation::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling run");
            on_interrupt.cancel();
        }
    });

    if !herd_core::run(config, &cancel).await {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_ssh_flags() {
        let cli = parse(&[
            "herd", "-m", "web-1,web-2", "-p", "2222", "-u", "deploy", "ssh", "-c", "uptime",
        ]);
        let config = build_config(cli, FileConfig::default()).unwrap();

        assert_eq!(config.hosts, vec!["web-1", "web-2"]);
        assert_eq!(config.port, 2222);
        assert_eq!(config.user, "deploy");
        assert_eq!(
            config.operation,
            Operation::Command {
                command: "uptime".to_string()
            }
        );
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&[
            "herd", "scp", "--src", "dist", "--dst", "/srv/site", "-r", "-m", "web-1", "-n",
            "--host-exclude", "db-*",
        ]);
        let config = build_config(cli, FileConfig::default()).unwrap();

        assert!(config.dry_run);
        assert_eq!(config.exclude, vec!["db-*"]);
        assert_eq!(
            config.operation,
            Operation::Copy {
                source: PathBuf::from("dist"),
                destination: PathBuf::from("/srv/site"),
                recursive: true,
            }
        );
    }

    #[test]
    fn test_flags_override_file() {
        let file = FileConfig {
            machines: vec!["from-file".to_string()],
            port: Some(2200),
            timeout: Some(9),
            output_format: Some("json".to_string()),
            ..Default::default()
        };
        let cli = parse(&["herd", "-p", "22", "ssh", "-c", "id"]);
        let config = build_config(cli, file).unwrap();

        assert_eq!(config.hosts, vec!["from-file"]);
        assert_eq!(config.port, 22);
        assert_eq!(config.timeout_secs, 9);
        assert_eq!(config.output_format, OutputFormat::Json);
    }

    #[test]
    fn test_unknown_output_format() {
        let cli = parse(&["herd", "-o", "xml", "ssh", "-c", "id"]);
        assert!(build_config(cli, FileConfig::default()).is_err());
    }

    #[test]
    fn test_agent_socket_from_flag() {
        let cli = parse(&["herd", "-a", "-s", "/tmp/agent.sock", "ssh", "-c", "id"]);
        let config = build_config(cli, FileConfig::default()).unwrap();

        assert!(config.use_agent);
        assert_eq!(config.agent_socket, PathBuf::from("/tmp/agent.sock"));
    }
}
