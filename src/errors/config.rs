// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;

/// Errors that can occur while loading or validating an engine configuration
#[derive(Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    Io {
        /// Path that was being read
        path: String,
        /// Underlying I/O failure
        source: std::io::Error,
    },
    /// The configuration file could not be parsed
    Parse {
        /// Path that was being parsed
        path: String,
        /// Parser message (YAML or TOML)
        reason: String,
    },
    /// A field holds a value outside its allowed range
    Invalid {
        /// Name of the offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "Failed to read configuration '{}': {}", path, source)
            }
            ConfigError::Parse { path, reason } => {
                write!(f, "Failed to parse configuration '{}': {}", path, reason)
            }
            ConfigError::Invalid { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_display_names_field() {
        let err = ConfigError::Invalid {
            field: "batch_size",
            reason: "must be greater than zero".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid value for 'batch_size': must be greater than zero"
        );
    }

    #[test]
    fn test_io_error_exposes_source() {
        use std::error::Error;

        let err = ConfigError::Io {
            path: "missing.yaml".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("missing.yaml"));
    }
}
