//! Rendering and emitting per-host outcomes

use std::io::Write;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::OutputFormat;
use crate::outcome::HostOutcome;

#[derive(Serialize)]
struct JsonLine<'a> {
    host: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// Render one outcome as a single block of text
#[must_use]
pub fn render(format: OutputFormat, outcome: &HostOutcome) -> String {
    match format {
        OutputFormat::Text => match &outcome.error {
            None => format!("{}:\n{}", outcome.host, outcome.output),
            Some(error) => format!("{}:\n{}\n{}\n", outcome.host, outcome.output, error),
        },
        OutputFormat::Json => {
            let line = match &outcome.error {
                None => JsonLine {
                    host: &outcome.host,
                    output: Some(&outcome.output),
                    error: None,
                },
                Some(error) => JsonLine {
                    host: &outcome.host,
                    output: None,
                    error: Some(error),
                },
            };
            // serializing borrowed strings cannot fail
            serde_json::to_string(&line).unwrap_or_default() + "\n"
        }
    }
}

type Sink = Box<dyn Write + Send>;

/// Destination for rendered outcomes and diagnostics
///
/// Each block is written under a lock so output from concurrent hosts never interleaves.
pub struct Reporter {
    out: Mutex<Sink>,
    diag: Mutex<Sink>,
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter").finish_non_exhaustive()
    }
}

impl Reporter {
    /// Report to arbitrary writers
    pub fn new(out: impl Write + Send + 'static, diag: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
            diag: Mutex::new(Box::new(diag)),
        }
    }

    /// Report to the process stdout and stderr
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(std::io::stdout(), std::io::stderr())
    }

    /// Write a rendered block to the output stream
    pub async fn emit(&self, block: &str) {
        let mut out = self.out.lock().await;
        if let Err(e) = out.write_all(block.as_bytes()).and_then(|()| out.flush()) {
            warn!(error = %e, "failed to write output");
        }
    }

    /// Write one line to the diagnostic stream
    pub async fn diagnostic(&self, line: &str) {
        let mut diag = self.diag.lock().await;
        if let Err(e) = writeln!(diag, "{line}").and_then(|()| diag.flush()) {
            warn!(error = %e, "failed to write diagnostics");
        }
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::stdio()
    }
}
