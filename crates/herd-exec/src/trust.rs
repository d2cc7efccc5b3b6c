//! Host key trust policy

use std::path::{Path, PathBuf};

use russh::keys::{check_known_hosts_path, parse_public_key_base64, ssh_key};
use tracing::{debug, warn};

use crate::error::ExecError;

/// How presented host keys are validated for one run
#[derive(Debug, Clone)]
pub enum HostKeyPolicy {
    /// Accept every key
    Insecure,
    /// Accept keys recorded in a known_hosts file
    KnownHosts(KnownHostsFile),
}

impl HostKeyPolicy {
    /// Choose the policy for a run
    ///
    /// An unreadable or malformed known_hosts file falls back to `Insecure`, loudly.
    #[must_use]
    pub fn new(known_hosts: &Path, insecure_host: bool) -> Self {
        if insecure_host {
            warn!("using insecure host key verification, this is not recommended for production");
            return HostKeyPolicy::Insecure;
        }

        match KnownHostsFile::load(known_hosts) {
            Ok(file) => {
                debug!(path = %known_hosts.display(), entries = file.entries, "loaded known_hosts");
                HostKeyPolicy::KnownHosts(file)
            }
            Err(e) => {
                warn!("could not read known_hosts file: {e}");
                warn!("falling back to insecure host key verification");
                warn!(
                    "to fix this, ensure {} exists or pass --insecure-host to silence this warning",
                    known_hosts.display()
                );
                HostKeyPolicy::Insecure
            }
        }
    }

    /// Decide whether `key`, presented by `host:port`, is trusted
    ///
    /// # Errors
    /// Returns `ExecError::HostKeyRejected` when the key is unknown or changed
    pub fn verify(
        &self,
        host: &str,
        port: u16,
        key: &ssh_key::PublicKey,
    ) -> Result<(), ExecError> {
        match self {
            HostKeyPolicy::Insecure => Ok(()),
            HostKeyPolicy::KnownHosts(file) => file.verify(host, port, key),
        }
    }

    #[must_use]
    pub fn is_insecure(&self) -> bool {
        matches!(self, HostKeyPolicy::Insecure)
    }
}

/// A known_hosts file that parsed cleanly when loaded
#[derive(Debug, Clone)]
pub struct KnownHostsFile {
    path: PathBuf,
    entries: usize,
}

/// known_hosts loading errors
#[derive(Debug, thiserror::Error)]
pub enum KnownHostsError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: malformed entry")]
    Malformed { path: String, line: usize },
}

impl KnownHostsFile {
    /// Read and validate a known_hosts file
    ///
    /// # Errors
    /// Returns `KnownHostsError` if the file cannot be read or a line is not a valid entry
    pub fn load(path: &Path) -> Result<Self, KnownHostsError> {
        let content = std::fs::read_to_string(path).map_err(|source| KnownHostsError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut entries = 0;
        for (idx, line) in content.lines().enumerate() {
            if !valid_entry(line) {
                return Err(KnownHostsError::Malformed {
                    path: path.display().to_string(),
                    line: idx + 1,
                });
            }
            if !is_blank(line) {
                entries += 1;
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    #[must_use]
    pub fn entries(&self) -> usize {
        self.entries
    }

    fn verify(&self, host: &str, port: u16, key: &ssh_key::PublicKey) -> Result<(), ExecError> {
        match check_known_hosts_path(host, port, key, &self.path) {
            Ok(true) => Ok(()),
            Ok(false) => Err(ExecError::HostKeyRejected(format!(
                "{host} is not present in {}",
                self.path.display()
            ))),
            Err(e) => Err(ExecError::HostKeyRejected(e.to_string())),
        }
    }
}

fn is_blank(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.starts_with('#')
}

fn valid_entry(line: &str) -> bool {
    if is_blank(line) {
        return true;
    }

    let mut fields = line.split_whitespace();
    let mut hosts = fields.next();
    if hosts.is_some_and(|h| h.starts_with('@')) {
        hosts = fields.next();
    }

    match (hosts, fields.next(), fields.next()) {
        (Some(_), Some(_), Some(key)) => parse_public_key_base64(key).is_ok(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const ED25519: &str =
        "AAAAC3NzaC1lZDI1NTE5AAAAIMEwmZB+Q5TU8ZADk7SJ29HW7WHO1XaYsoTQqOAlbTxq";

    fn known_hosts(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn sample_key() -> ssh_key::PublicKey {
        parse_public_key_base64(ED25519).unwrap()
    }

    #[test]
    fn test_insecure_accepts_any_key() {
        let policy = HostKeyPolicy::new(Path::new("/nonexistent/known_hosts"), true);

        assert!(policy.is_insecure());
        assert!(policy.verify("anything", 22, &sample_key()).is_ok());
    }

    #[test]
    fn test_missing_file_falls_back_to_insecure() {
        let policy = HostKeyPolicy::new(Path::new("/nonexistent/known_hosts"), false);
        assert!(policy.is_insecure());
    }

    #[test]
    fn test_malformed_file_falls_back_to_insecure() {
        let file = known_hosts("this is not a known hosts line\n");

        assert!(matches!(
            KnownHostsFile::load(file.path()),
            Err(KnownHostsError::Malformed { line: 1, .. })
        ));
        assert!(HostKeyPolicy::new(file.path(), false).is_insecure());
    }

    #[test]
    fn test_load_skips_comments_and_markers() {
        let file = known_hosts(&format!(
            "# comment\n\nweb-1 ssh-ed25519 {ED25519}\n@cert-authority *.lan ssh-ed25519 {ED25519}\n"
        ));

        let loaded = KnownHostsFile::load(file.path()).unwrap();
        assert_eq!(loaded.entries(), 2);
    }

    #[test]
    fn test_known_host_accepted() {
        let file = known_hosts(&format!("web-1 ssh-ed25519 {ED25519}\n"));
        let policy = HostKeyPolicy::new(file.path(), false);

        assert!(!policy.is_insecure());
        assert!(policy.verify("web-1", 22, &sample_key()).is_ok());
    }

    #[test]
    fn test_unknown_host_rejected() {
        let file = known_hosts(&format!("web-1 ssh-ed25519 {ED25519}\n"));
        let policy = HostKeyPolicy::new(file.path(), false);

        let err = policy.verify("db-1", 22, &sample_key()).unwrap_err();
        assert!(matches!(err, ExecError::HostKeyRejected(_)));
    }
}
