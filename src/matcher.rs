//! Pattern-based success/failure classification.
//!
//! Exit code alone is a poor success signal for many commands (curl exits 0
//! on HTTP 500, health probes print "DEGRADED" and exit 0). [`PatternMatcher`]
//! classifies an attempt by matching regexes against the combined output,
//! falling back to the exit code when neither pattern decides.

use regex::{Regex, RegexBuilder};

use crate::error::{RepeaterError, Result};

/// Classifies command output as success or failure.
///
/// Patterns compile once at construction; a bad regex is a config error.
/// The failure pattern always wins over the success pattern, and both are
/// matched against `stdout + "\n" + stderr`. With no patterns configured,
/// classification is `exit_code == 0`.
///
/// Evaluation is read-only after construction, so a single matcher is safe
/// to share across concurrent attempts.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    success: Option<Regex>,
    failure: Option<Regex>,
}

impl PatternMatcher {
    /// Compile the configured patterns. Empty strings mean "not configured".
    pub fn new(
        success_pattern: Option<&str>,
        failure_pattern: Option<&str>,
        case_insensitive: bool,
    ) -> Result<Self> {
        Ok(PatternMatcher {
            success: compile(success_pattern, "success-pattern", case_insensitive)?,
            failure: compile(failure_pattern, "failure-pattern", case_insensitive)?,
        })
    }

    /// A matcher with no patterns: pure exit-code classification.
    pub fn exit_code_only() -> Self {
        PatternMatcher {
            success: None,
            failure: None,
        }
    }

    /// Classify one attempt.
    ///
    /// Order: failure pattern, then success pattern, then exit code.
    pub fn classify(&self, stdout: &str, stderr: &str, exit_code: i32) -> bool {
        let combined = format!("{}\n{}", stdout, stderr);
        if let Some(ref failure) = self.failure {
            if failure.is_match(&combined) {
                return false;
            }
        }
        if let Some(ref success) = self.success {
            if success.is_match(&combined) {
                return true;
            }
        }
        exit_code == 0
    }
}

fn compile(pattern: Option<&str>, field: &str, case_insensitive: bool) -> Result<Option<Regex>> {
    match pattern {
        None => Ok(None),
        Some("") => Ok(None),
        Some(p) => RegexBuilder::new(p)
            .case_insensitive(case_insensitive)
            .build()
            .map(Some)
            .map_err(|e| RepeaterError::config(field, e.to_string())),
    }
}
