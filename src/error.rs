use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubburnError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{tool} is not installed or not on PATH")]
    ToolMissing { tool: String },

    #[error("Not a readable media file: {0}")]
    NonMedia(String),

    #[error("{operation} failed with exit code {}", code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    EncodeFailed {
        operation: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Transcription error: {0}")]
    Transcriber(String),

    #[error("{0}")]
    QuotaExceeded(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Wrong state: {0}")]
    WrongState(String),

    #[error("Missing artifact: {0}")]
    MissingArtifact(String),

    #[error("No file was uploaded")]
    NoFile,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Queue error: {0}")]
    Queue(String),
}

/// Failure classes reported for a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ToolMissing,
    NonMedia,
    EncodeFailed,
    QuotaExceeded,
    NotFound,
    WrongState,
    MissingArtifact,
    Abandoned,
    Internal,
}

impl SubburnError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SubburnError::ToolMissing { .. } => FailureKind::ToolMissing,
            SubburnError::NonMedia(_) => FailureKind::NonMedia,
            SubburnError::EncodeFailed { .. } | SubburnError::Transcriber(_) => FailureKind::EncodeFailed,
            SubburnError::QuotaExceeded(_) => FailureKind::QuotaExceeded,
            SubburnError::NotFound(_) => FailureKind::NotFound,
            SubburnError::WrongState(_) => FailureKind::WrongState,
            SubburnError::MissingArtifact(_) => FailureKind::MissingArtifact,
            _ => FailureKind::Internal,
        }
    }

    /// Message safe to show through status lookup. Never contains paths or raw stderr.
    pub fn public_message(&self) -> String {
        match self {
            SubburnError::Io(_) | SubburnError::Json(_) => {
                "An internal storage error occurred while processing the video.".to_string()
            }
            SubburnError::Http(_) => "The transcription service could not be reached.".to_string(),
            SubburnError::Toml(_) | SubburnError::Config(_) | SubburnError::Queue(_) => {
                "The processing service is misconfigured.".to_string()
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SubburnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_failed_message_hides_stderr() {
        let err = SubburnError::EncodeFailed {
            operation: "Subtitle burn".to_string(),
            code: Some(1),
            stderr: "/srv/uploads/abc_video.mp4: Invalid data".to_string(),
        };
        assert_eq!(err.public_message(), "Subtitle burn failed with exit code 1");
        assert_eq!(err.kind(), FailureKind::EncodeFailed);
    }

    #[test]
    fn test_io_message_is_generic() {
        let err = SubburnError::from(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "/srv/uploads/secret",
        ));
        assert!(!err.public_message().contains("/srv"));
        assert_eq!(err.kind(), FailureKind::Internal);
    }
}
