//! Configuration error type

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building, validating or loading a
/// [`ResilienceConfig`](crate::ResilienceConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A single field holds a value outside its allowed range
    #[error("invalid value for `{field}`: {message}")]
    Invalid { field: String, message: String },

    /// Several fields are invalid; validation reports all of them at once
    #[error("{} configuration errors: {}", .0.len(), join_messages(.0))]
    Multiple(Vec<ConfigError>),

    /// A TOML or JSON document could not be parsed
    #[error("invalid {format} configuration: {message}")]
    Parse { format: &'static str, message: String },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown profile `{0}` (expected development, staging, production or test)")]
    UnknownProfile(String),

    /// No configuration source was found
    #[error("configuration not found: {0}")]
    NotFound(String),
}

fn join_messages(errors: &[ConfigError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid { field: field.into(), message: message.into() }
    }

    /// Collapse a list of violations: `Ok` when empty, the error itself when
    /// there is exactly one, [`ConfigError::Multiple`] otherwise.
    pub fn from_violations(mut errors: Vec<ConfigError>) -> Result<(), ConfigError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }

    /// Names of every invalid field reported by this error.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Self::Invalid { field, .. } => vec![field.as_str()],
            Self::Multiple(errors) => errors.iter().flat_map(ConfigError::fields).collect(),
            _ => Vec::new(),
        }
    }
}

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_violations_collapses() {
        assert!(ConfigError::from_violations(Vec::new()).is_ok());

        let single = ConfigError::from_violations(vec![ConfigError::invalid("a", "bad")])
            .unwrap_err();
        assert!(matches!(single, ConfigError::Invalid { .. }));

        let many = ConfigError::from_violations(vec![
            ConfigError::invalid("a", "bad"),
            ConfigError::invalid("b", "worse"),
        ])
        .unwrap_err();
        assert_eq!(many.fields(), vec!["a", "b"]);
        assert_eq!(
            many.to_string(),
            "2 configuration errors: invalid value for `a`: bad; invalid value for `b`: worse"
        );
    }

    #[test]
    fn test_unknown_profile_message() {
        let err = ConfigError::UnknownProfile("qa".into());
        assert!(err.to_string().contains("`qa`"));
        assert!(err.fields().is_empty());
    }
}
