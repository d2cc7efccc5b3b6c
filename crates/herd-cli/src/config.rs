//! Optional TOML configuration file
//!
//! Values here fill in anything not given on the command line.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Contents of `herd.toml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub machines: Vec<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub key: Option<PathBuf>,
    pub useagent: Option<bool>,
    pub agentsock: Option<PathBuf>,
    pub timeout: Option<u64>,
    pub connect_timeout: Option<u64>,
    pub command_timeout: Option<u64>,
    pub output_format: Option<String>,
    pub host_patterns: Vec<String>,
    pub host_excludes: Vec<String>,
    pub known_hosts: Option<PathBuf>,
    pub insecure_host: Option<bool>,
    pub copy_helper: Option<PathBuf>,
}

impl FileConfig {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path`, or from the default locations when none is given
    ///
    /// A missing file at a default location is not an error; a missing explicit file is.
    ///
    /// # Errors
    /// Returns error if a file exists but cannot be read or parsed
    pub fn load_or_default(path: Option<&Path>) -> eyre::Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        if let Ok(path) = std::env::var("HERD_CONFIG") {
            return Self::load(Path::new(&path));
        }

        let candidates = [
            dirs::config_dir().map(|p| p.join("herd/herd.toml")),
            dirs::home_dir().map(|p| p.join(".herd.toml")),
        ];

        for path in candidates.into_iter().flatten() {
            if path.exists() {
                tracing::debug!(path = %path.display(), "using config file");
                return Self::load(&path);
            }
        }

        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
machines = ["web-1", "web-2"]
user = "deploy"
port = 2222
timeout = 10
host_excludes = ["*-backup-*"]
insecure_host = true
"#
        )
        .unwrap();

        let config = FileConfig::load(file.path()).unwrap();

        assert_eq!(config.machines, vec!["web-1", "web-2"]);
        assert_eq!(config.user.as_deref(), Some("deploy"));
        assert_eq!(config.port, Some(2222));
        assert_eq!(config.timeout, Some(10));
        assert_eq!(config.host_excludes, vec!["*-backup-*"]);
        assert_eq!(config.insecure_host, Some(true));
        assert!(config.key.is_none());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "machnies = [\"web-1\"]").unwrap();

        assert!(FileConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(FileConfig::load_or_default(Some(Path::new("/nonexistent/herd.toml"))).is_err());
    }
}
