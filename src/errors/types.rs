//! Error type definitions for camfeed
//!
//! A small hierarchy: layer-specific enums convert into [`AppError`] so that
//! the binary can propagate anything with `?`.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Camera REST API errors
    #[error("Camera API error: {0}")]
    CameraApi(#[from] CameraApiError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures observed by the stream controller and its detectors.
///
/// None of these are fatal: load failures feed the retry policy, probe
/// failures degrade to a default tier and sample failures are dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// No load-success signal arrived within the load window
    #[error("Stream load timed out after {timeout_ms}ms")]
    LoadTimeout { timeout_ms: u64 },

    /// The display surface reported an explicit failure
    #[error("Stream load failed: {message}")]
    LoadError { message: String },

    /// The bandwidth probe did not complete
    #[error("Bandwidth probe failed: {message}")]
    ProbeFailure { message: String },

    /// The displayed frame could not be sampled
    #[error("Frame sampling failed: {message}")]
    SampleFailure { message: String },
}

impl StreamError {
    pub fn load_error<S: Into<String>>(message: S) -> Self {
        Self::LoadError {
            message: message.into(),
        }
    }

    pub fn probe_failure<S: Into<String>>(message: S) -> Self {
        Self::ProbeFailure {
            message: message.into(),
        }
    }

    pub fn sample_failure<S: Into<String>>(message: S) -> Self {
        Self::SampleFailure {
            message: message.into(),
        }
    }
}

/// Camera REST API errors
#[derive(Error, Debug)]
pub enum CameraApiError {
    /// Transport-level failure
    #[error("Request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status
    #[error("HTTP error: {status} from {endpoint}")]
    Status { endpoint: String, status: u16 },

    /// The API answered with `success: false`
    #[error("Camera API rejected request: {message}")]
    Rejected { message: String },

    /// Snapshot payload was not a usable data URL
    #[error("Invalid snapshot payload: {message}")]
    InvalidSnapshot { message: String },

    /// Malformed base URL or endpoint path
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Loading or merging configuration sources failed
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A field failed validation
    #[error("Invalid configuration: {field} - {message}")]
    Invalid { field: String, message: String },

    /// Serializing the effective configuration failed
    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

impl ConfigError {
    pub fn invalid<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_error_messages() {
        let err = StreamError::LoadTimeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Stream load timed out after 5000ms");

        let err = StreamError::load_error("connection reset");
        assert_eq!(err.to_string(), "Stream load failed: connection reset");
    }

    #[test]
    fn test_layer_errors_convert_to_app_error() {
        let app: AppError = CameraApiError::Rejected {
            message: "busy".to_string(),
        }
        .into();
        assert!(matches!(app, AppError::CameraApi(CameraApiError::Rejected { .. })));
        assert_eq!(app.to_string(), "Camera API error: Camera API rejected request: busy");

        let app: AppError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert!(matches!(app, AppError::Io(_)));
    }

    #[test]
    fn test_config_error_invalid() {
        let err = ConfigError::invalid("stream.max_attempts", "must be greater than zero");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: stream.max_attempts - must be greater than zero"
        );
    }
}
