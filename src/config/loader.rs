//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Also covers duplicate keys, which `toml` rejects while parsing.
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_keys_rejected() {
        let raw = r#"
            [logging]
            level = "info"
            level = "debug"
        "#;
        assert!(matches!(parse_config(raw), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_parse_minimal() {
        let raw = r#"
            [[sites]]
            name = "main"
            host = "localhost"
            port = 8080
            root = "sites/main"
        "#;
        let config = parse_config(raw).unwrap();
        assert_eq!(config.sites.len(), 1);
        assert_eq!(config.sites[0].name, "main");
    }

    #[test]
    fn test_validation_error_display() {
        let err = parse_config("").unwrap_err();
        assert_eq!(err.to_string(), "Validation failed: no sites configured");
    }
}
