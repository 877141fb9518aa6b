use thiserror::Error;

/// Errors produced by the runner and its components.
#[derive(Error, Debug)]
pub enum RepeaterError {
    /// Invalid configuration detected at build time, before the loop starts.
    /// Carries the offending option name so the CLI can point at it.
    #[error("invalid value for '{field}': {message}")]
    Config { field: String, message: String },

    /// Config file could not be parsed.
    #[error("config file parsing failed: {0}")]
    ConfigFile(#[from] toml::de::Error),

    /// The executor could not spawn the command at all (not a failed
    /// attempt: those are recorded as data, never raised).
    #[error("failed to spawn command: {0}")]
    Spawn(#[source] std::io::Error),

    /// Catch-all for broken internal invariants.
    #[error("{0}")]
    Internal(String),
}

impl RepeaterError {
    /// Shorthand for a [`RepeaterError::Config`] with an owned field name.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        RepeaterError::Config {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for RepeaterError {
    fn from(err: anyhow::Error) -> Self {
        RepeaterError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RepeaterError>;
