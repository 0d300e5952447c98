// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors surfaced by the batch engine and the stream stages.

use thiserror::Error;

use super::ConfigError;

/// Caller-facing error type for transforms and sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that end a `process_stream` run or a stream pipeline.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A run is already active on this engine instance
    #[error("Engine is busy: a processing run is already active")]
    Busy,

    /// A batch transform failed and no error handler was registered
    #[error("Transform failed for batch {batch_index}: {source}")]
    Transform {
        batch_index: u64,
        #[source]
        source: BoxError,
    },

    /// The item source failed while producing
    #[error("Source failed: {source}")]
    Source {
        #[source]
        source: BoxError,
    },

    /// A stream stage terminated with an error
    #[error("Stage '{stage}' failed: {message}")]
    Stage { stage: &'static str, message: String },

    /// The engine configuration was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Internal consistency failure (task join errors and similar)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    /// Short, stable label used in structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Busy => "busy",
            EngineError::Transform { .. } => "transform",
            EngineError::Source { .. } => "source",
            EngineError::Stage { .. } => "stage",
            EngineError::Config(_) => "config",
            EngineError::Internal { .. } => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_error_display_and_kind() {
        let err = EngineError::Transform {
            batch_index: 3,
            source: "boom".into(),
        };
        assert_eq!(err.to_string(), "Transform failed for batch 3: boom");
        assert_eq!(err.kind(), "transform");
    }

    #[test]
    fn test_config_error_converts() {
        let err: EngineError = ConfigError::Invalid {
            field: "max_concurrency",
            reason: "must be greater than zero".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "config");
        assert!(err.to_string().contains("max_concurrency"));
    }
}
