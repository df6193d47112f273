//! Error types for slowwave.

use crate::tts::frame::FrameError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SlowwaveError {
    // Configuration errors
    #[error("Required configuration missing: {}", fields.join(", "))]
    ConfigurationMissing { fields: Vec<String> },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Synthesis transport errors
    #[error("Synthesis connection failed: {message}")]
    Connection { message: String },

    #[error("Timed out waiting for {stage}")]
    Timeout { stage: String },

    #[error("Protocol error: {0}")]
    Protocol(#[from] FrameError),

    #[error("Synthesis server error: {message}")]
    Server { message: String },

    // Local audio errors
    #[error("Audio device error: {message}")]
    AudioDevice { message: String },

    // Story text provider errors
    #[error("Story generation failed: {message}")]
    StoryGeneration { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl SlowwaveError {
    /// Build a `ConfigurationMissing` error from field names.
    pub fn missing<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SlowwaveError::ConfigurationMissing {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn server(message: impl Into<String>) -> Self {
        SlowwaveError::Server {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        SlowwaveError::Connection {
            message: message.into(),
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, SlowwaveError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_configuration_missing_lists_all_fields() {
        let error = SlowwaveError::missing(["VOLC_APP_ID", "VOLC_ACCESS_TOKEN"]);
        assert_eq!(
            error.to_string(),
            "Required configuration missing: VOLC_APP_ID, VOLC_ACCESS_TOKEN"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = SlowwaveError::ConfigInvalidValue {
            key: "narration.max_segment_chars".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for narration.max_segment_chars: must be positive"
        );
    }

    #[test]
    fn test_connection_display() {
        let error = SlowwaveError::connection("reset by peer");
        assert_eq!(
            error.to_string(),
            "Synthesis connection failed: reset by peer"
        );
    }

    #[test]
    fn test_timeout_display() {
        let error = SlowwaveError::Timeout {
            stage: "session ready".to_string(),
        };
        assert_eq!(error.to_string(), "Timed out waiting for session ready");
    }

    #[test]
    fn test_server_display() {
        let error = SlowwaveError::server("quota exceeded");
        assert_eq!(error.to_string(), "Synthesis server error: quota exceeded");
    }

    #[test]
    fn test_protocol_from_frame_error() {
        let error: SlowwaveError = FrameError::Truncated {
            needed: 12,
            available: 4,
        }
        .into();
        assert!(error.to_string().starts_with("Protocol error:"));
    }

    #[test]
    fn test_audio_device_display() {
        let error = SlowwaveError::AudioDevice {
            message: "no output device".to_string(),
        };
        assert_eq!(error.to_string(), "Audio device error: no output device");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: SlowwaveError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: SlowwaveError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<SlowwaveError>();
        assert_sync::<SlowwaveError>();
    }
}
