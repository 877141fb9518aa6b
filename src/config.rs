//! Run configuration and the optional TOML config file.
//!
//! [`RunnerConfig`] is the validated input to a run: the command, the
//! schedule, stop conditions, and classification patterns. [`FileConfig`]
//! is the partial shape read from `--config <file>`; the CLI merges it
//! underneath explicit flags, then everything funnels through the same
//! validation.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{RepeaterError, Result};
use crate::http::HttpAwareConfig;
use crate::parsing::parse_duration;
use crate::scheduler::ScheduleSpec;

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a run needs, validated before the loop starts.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Command to execute, argv form.
    pub command: Vec<String>,
    /// Scheduling discipline.
    pub schedule: ScheduleSpec,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Stop after this many attempts.
    pub max_attempts: Option<u64>,
    /// Stop once this much wall time has elapsed.
    pub max_duration: Option<Duration>,
    /// Regex marking an attempt successful regardless of exit code.
    pub success_pattern: Option<String>,
    /// Regex marking an attempt failed regardless of exit code.
    pub failure_pattern: Option<String>,
    /// Case-insensitive pattern matching.
    pub case_insensitive: bool,
    /// Honor server-advertised retry timing in command output.
    pub http_aware: Option<HttpAwareConfig>,
    /// Stream each attempt's stdout/stderr through.
    pub show_output: bool,
}

impl RunnerConfig {
    pub fn new(command: Vec<String>, schedule: ScheduleSpec) -> Self {
        RunnerConfig {
            command,
            schedule,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: None,
            max_duration: None,
            success_pattern: None,
            failure_pattern: None,
            case_insensitive: false,
            http_aware: None,
            show_output: false,
        }
    }

    /// Cross-field checks the individual schedulers cannot do themselves.
    pub fn validate(&self) -> Result<()> {
        if self.command.is_empty() {
            return Err(RepeaterError::config("command", "no command given"));
        }
        if self.timeout.is_zero() {
            return Err(RepeaterError::config("timeout", "must be positive"));
        }
        if self.max_attempts == Some(0) {
            return Err(RepeaterError::config("times", "must be positive"));
        }
        if self.max_duration == Some(Duration::ZERO) {
            return Err(RepeaterError::config("for", "must be positive"));
        }
        if let Some(http) = &self.http_aware {
            if http.min_delay > http.max_delay {
                return Err(RepeaterError::config(
                    "http-min-delay",
                    "must not exceed http-max-delay",
                ));
            }
        }
        Ok(())
    }
}

/// Optional config file. Every field is optional; explicit CLI flags win.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    pub timeout: Option<String>,
    pub success_pattern: Option<String>,
    pub failure_pattern: Option<String>,
    pub case_insensitive: Option<bool>,
    pub show_output: Option<bool>,
    pub metrics_port: Option<u16>,
    pub health_port: Option<u16>,
    pub http_aware: Option<FileHttpAware>,
}

/// The `[http-aware]` table of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileHttpAware {
    pub enabled: Option<bool>,
    pub min_delay: Option<String>,
    pub max_delay: Option<String>,
    pub parse_json: Option<bool>,
    pub parse_headers: Option<bool>,
    pub trust_client_errors: Option<bool>,
    pub json_fields: Option<Vec<String>>,
    pub header_names: Option<Vec<String>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RepeaterError::config("config", format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// The file's timeout, parsed.
    pub fn parsed_timeout(&self) -> Result<Option<Duration>> {
        parse_field(self.timeout.as_deref(), "timeout")
    }
}

impl FileHttpAware {
    /// Fold the file settings over defaults into a full config.
    pub fn resolve(&self) -> Result<HttpAwareConfig> {
        let defaults = HttpAwareConfig::default();
        Ok(HttpAwareConfig {
            min_delay: parse_field(self.min_delay.as_deref(), "http-aware.min-delay")?
                .unwrap_or(defaults.min_delay),
            max_delay: parse_field(self.max_delay.as_deref(), "http-aware.max-delay")?
                .unwrap_or(defaults.max_delay),
            parse_json: self.parse_json.unwrap_or(defaults.parse_json),
            parse_headers: self.parse_headers.unwrap_or(defaults.parse_headers),
            trust_client_errors: self
                .trust_client_errors
                .unwrap_or(defaults.trust_client_errors),
            json_fields: self.json_fields.clone().unwrap_or_default(),
            header_names: self.header_names.clone().unwrap_or_default(),
        })
    }
}

fn parse_field(value: Option<&str>, field: &str) -> Result<Option<Duration>> {
    value
        .map(|s| parse_duration(s).map_err(|e| RepeaterError::config(field, e)))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::IntervalConfig;

    fn config() -> RunnerConfig {
        RunnerConfig::new(
            vec!["echo".to_string(), "hi".to_string()],
            ScheduleSpec::Interval(IntervalConfig::new(Duration::from_secs(1))),
        )
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_command() {
        let mut bad = config();
        bad.command.clear();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_bounds() {
        let mut bad = config();
        bad.timeout = Duration::ZERO;
        assert!(bad.validate().is_err());

        let mut bad = config();
        bad.max_attempts = Some(0);
        assert!(bad.validate().is_err());

        let mut bad = config();
        bad.max_duration = Some(Duration::ZERO);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_http_band() {
        let mut bad = config();
        bad.http_aware = Some(HttpAwareConfig {
            min_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(10),
            ..HttpAwareConfig::default()
        });
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_file_config_parses() {
        let file: FileConfig = toml::from_str(
            r#"
            timeout = "45s"
            success-pattern = "deployed"
            case-insensitive = true
            metrics-port = 9090

            [http-aware]
            enabled = true
            max-delay = "10m"
            json-fields = ["wait_seconds"]
            "#,
        )
        .unwrap();
        assert_eq!(file.parsed_timeout().unwrap(), Some(Duration::from_secs(45)));
        assert_eq!(file.success_pattern.as_deref(), Some("deployed"));
        assert_eq!(file.metrics_port, Some(9090));

        let http = file.http_aware.unwrap();
        assert_eq!(http.enabled, Some(true));
        let resolved = http.resolve().unwrap();
        assert_eq!(resolved.max_delay, Duration::from_secs(600));
        assert_eq!(resolved.min_delay, Duration::from_secs(1));
        assert_eq!(resolved.json_fields, vec!["wait_seconds".to_string()]);
    }

    #[test]
    fn test_file_config_rejects_unknown_keys() {
        assert!(toml::from_str::<FileConfig>("tiemout = \"45s\"").is_err());
    }

    #[test]
    fn test_file_config_bad_duration_names_field() {
        let file: FileConfig = toml::from_str("timeout = \"soonish\"").unwrap();
        match file.parsed_timeout().unwrap_err() {
            RepeaterError::Config { field, .. } => assert_eq!(field, "timeout"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
