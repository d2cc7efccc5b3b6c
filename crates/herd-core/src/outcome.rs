//! Per-host outcomes and the run summary

use std::fmt::Display;

use serde::Serialize;

/// Result of operating on one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostOutcome {
    /// Host as given in the invocation
    pub host: String,
    /// Captured output (command stdout, or copy status)
    pub output: String,
    /// Failure message, `None` on success
    pub error: Option<String>,
}

impl HostOutcome {
    pub fn success(host: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(host: impl Into<String>, output: impl Into<String>, error: impl Display) -> Self {
        Self {
            host: host.into(),
            output: output.into(),
            error: Some(error.to_string()),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything collected from one run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Outcomes in completion order
    pub outcomes: Vec<HostOutcome>,
    /// Hosts a task was started for
    pub dispatched: usize,
    /// Collection stopped early because the run was cancelled
    pub cancelled: bool,
}

impl RunSummary {
    /// Aggregate result: every dispatched host reported, and reported success
    #[must_use]
    pub fn success(&self) -> bool {
        !self.cancelled
            && self.outcomes.len() == self.dispatched
            && self.outcomes.iter().all(HostOutcome::is_success)
    }

    /// Number of outcomes that carry an error
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }

    /// Number of successful outcomes
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.len() - self.failed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(outcomes: Vec<HostOutcome>) -> RunSummary {
        RunSummary {
            dispatched: outcomes.len(),
            outcomes,
            cancelled: false,
        }
    }

    #[test]
    fn test_empty_run_succeeds() {
        assert!(RunSummary::default().success());
    }

    #[test]
    fn test_one_failure_fails_run() {
        let run = summary(vec![
            HostOutcome::success("web-1", "ok\n"),
            HostOutcome::failure("web-2", "", "connection failed: refused"),
        ]);

        assert!(!run.success());
        assert_eq!(run.failed(), 1);
        assert_eq!(run.succeeded(), 1);
    }

    #[test]
    fn test_cancelled_run_fails() {
        let mut run = summary(vec![HostOutcome::success("web-1", "ok\n")]);
        run.cancelled = true;
        assert!(!run.success());
    }

    #[test]
    fn test_missing_outcome_fails_run() {
        let mut run = summary(vec![HostOutcome::success("web-1", "ok\n")]);
        run.dispatched = 2;
        assert!(!run.success());
    }
}
