//! Error types for factline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FactlineError {
    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Run lifecycle errors
    #[error("A run is already active: {run_id}")]
    RunAlreadyActive { run_id: String },

    #[error("No active run")]
    NoActiveRun,

    #[error("Invalid source URL: {url}")]
    InvalidSourceUrl { url: String },

    // Ingest errors
    #[error("Failed to spawn {program}: {message}")]
    IngestSpawn { program: String, message: String },

    #[error("Ingest error: {message}")]
    Ingest { message: String },

    // Transcription errors
    #[error("Transcription failed: {message}")]
    Transcription { message: String },

    // Evidence provider errors
    #[error("{provider} provider error: {message}")]
    Provider { provider: String, message: String },

    // The run-wide cancellation token fired; callers swallow this silently.
    #[error("cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl FactlineError {
    /// True when this error carries run-wide cancellation and must not
    /// produce any event.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FactlineError::Cancelled)
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, FactlineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn config_invalid_value_display() {
        let error = FactlineError::ConfigInvalidValue {
            key: "chunk_seconds".to_string(),
            message: "must be between 5 and 30".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for chunk_seconds: must be between 5 and 30"
        );
    }

    #[test]
    fn run_already_active_display() {
        let error = FactlineError::RunAlreadyActive {
            run_id: "run-1234".to_string(),
        };
        assert_eq!(error.to_string(), "A run is already active: run-1234");
    }

    #[test]
    fn ingest_spawn_display() {
        let error = FactlineError::IngestSpawn {
            program: "ffmpeg".to_string(),
            message: "not found".to_string(),
        };
        assert_eq!(error.to_string(), "Failed to spawn ffmpeg: not found");
    }

    #[test]
    fn provider_display() {
        let error = FactlineError::Provider {
            provider: "fred".to_string(),
            message: "missing API key".to_string(),
        };
        assert_eq!(error.to_string(), "fred provider error: missing API key");
    }

    #[test]
    fn cancelled_is_flagged() {
        assert!(FactlineError::Cancelled.is_cancelled());
        assert!(!FactlineError::NoActiveRun.is_cancelled());
    }

    #[test]
    fn from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: FactlineError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: FactlineError = io_error.into();

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<FactlineError>();
        assert_sync::<FactlineError>();
    }

    #[test]
    fn result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);
    }
}
