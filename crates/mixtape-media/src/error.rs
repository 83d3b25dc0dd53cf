//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Unreadable audio file {path}: {message}")]
    InvalidAudio { path: PathBuf, message: String },

    #[error("Audio file has zero duration: {0}")]
    ZeroDuration(PathBuf),

    #[error("Unreadable image {path}: {message}")]
    InvalidImage { path: PathBuf, message: String },

    #[error("Cannot render a video of zero duration")]
    EmptyRender,

    #[error("Crossfade input mismatch: {0}")]
    MixInput(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an unreadable-audio error.
    pub fn invalid_audio(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidAudio {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an unreadable-image error.
    pub fn invalid_image(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidImage {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The input itself is bad; retrying cannot help.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            MediaError::FileNotFound(_)
                | MediaError::InvalidAudio { .. }
                | MediaError::ZeroDuration(_)
                | MediaError::InvalidImage { .. }
        )
    }

    /// Tool or I/O failures that may succeed on another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MediaError::FfmpegFailed { .. } | MediaError::Timeout(_) | MediaError::Io(_)
        )
    }
}

/// Decoder messages that blame the input file rather than the tool.
pub(crate) fn looks_like_bad_input(stderr: &str) -> bool {
    const MARKERS: [&str; 3] = [
        "Invalid data found",
        "could not find codec parameters",
        "does not contain any stream",
    ];
    MARKERS.iter().any(|m| stderr.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(MediaError::ZeroDuration("a.mp3".into()).is_input_error());
        assert!(MediaError::invalid_image("bg.png", "truncated").is_input_error());
        assert!(MediaError::ffmpeg_failed("exit 1", None, Some(1)).is_transient());
        assert!(!MediaError::MixInput("bad".into()).is_transient());
        assert!(!MediaError::MixInput("bad".into()).is_input_error());
    }
}
