//! Error types for sisense-kit
//!
//! Every fallible SDK operation returns [`Result`]. Transport failures
//! (no response at all) are kept apart from HTTP error statuses so callers
//! can decide whether a retry makes sense.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for SDK operations
#[derive(Error, Debug)]
pub enum SdkError {
    /// The request never produced a response (DNS, TLS, connect, timeout)
    #[error("Transport error calling '{endpoint}': {message}")]
    Transport { endpoint: String, message: String },

    /// The server answered with a status the operation does not accept
    #[error("HTTP {status} from '{endpoint}': {body}")]
    Http {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// A named entity (user, group, dashboard, data model...) does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid argument combination supplied by the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Connection configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The response parsed but did not have the expected shape
    #[error("Unexpected response from '{endpoint}': {message}")]
    UnexpectedResponse { endpoint: String, message: String },

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(String),

    /// YAML config parsing error
    #[error("YAML error: {0}")]
    Yaml(String),

    /// CSV export error
    #[error("CSV error: {0}")]
    Csv(String),

    /// I/O error on a local file (config, export, log)
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<SdkError>,
    },
}

impl SdkError {
    /// Create a transport error for an endpoint
    pub fn transport(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create an HTTP status error for an endpoint
    pub fn http(endpoint: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            endpoint: endpoint.into(),
            status,
            body: body.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an invalid-argument error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create an unexpected-response error
    pub fn unexpected(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::WithContext { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::WithContext { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }

    /// True for a 403 answer, which several endpoints retry without `adminAccess`
    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(403)
    }
}

/// Result type alias for SDK operations
pub type Result<T> = std::result::Result<T, SdkError>;

impl From<serde_json::Error> for SdkError {
    fn from(err: serde_json::Error) -> Self {
        SdkError::Json(err.to_string())
    }
}

impl From<serde_yml::Error> for SdkError {
    fn from(err: serde_yml::Error) -> Self {
        SdkError::Yaml(err.to_string())
    }
}

impl From<csv::Error> for SdkError {
    fn from(err: csv::Error) -> Self {
        SdkError::Csv(err.to_string())
    }
}

impl From<std::io::Error> for SdkError {
    fn from(err: std::io::Error) -> Self {
        SdkError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| SdkError::io(path, e))
    }
}
