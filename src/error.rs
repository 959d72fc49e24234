//! Error types for the edge shield

use thiserror::Error;

/// Result type alias for edge shield operations
pub type Result<T> = std::result::Result<T, ShieldError>;

/// Kind of transport-level failure reported by a network fetcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailure {
    /// DNS resolution or connection establishment failed
    Connect,
    /// The origin did not answer in time
    Timeout,
    /// The request could not be sent or the body could not be read
    Request,
}

impl std::fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NetworkFailure::Connect => "connect",
            NetworkFailure::Timeout => "timeout",
            NetworkFailure::Request => "request",
        };
        f.write_str(name)
    }
}

/// Error types that can occur in the edge shield
#[derive(Error, Debug, Clone)]
pub enum ShieldError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error ({kind}): {message}")]
    NetworkError {
        kind: NetworkFailure,
        message: String,
    },

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Request rejected: {0}")]
    RejectedRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for ShieldError {
    fn from(err: std::io::Error) -> Self {
        ShieldError::IoError(err.to_string())
    }
}

impl From<http::Error> for ShieldError {
    fn from(err: http::Error) -> Self {
        ShieldError::HttpError(err.to_string())
    }
}

impl ShieldError {
    /// Create a NetworkError of the given kind
    pub fn network(kind: NetworkFailure, message: impl Into<String>) -> Self {
        ShieldError::NetworkError {
            kind,
            message: message.into(),
        }
    }

    /// Whether this error is a transport-level failure from the network fetcher.
    ///
    /// Only these errors are converted into class-specific fallback responses;
    /// non-2xx HTTP statuses are ordinary responses and never show up here.
    pub fn is_network_failure(&self) -> bool {
        matches!(self, ShieldError::NetworkError { .. })
    }

    /// Convert error to an HTTP status code for the front end
    ///
    /// Maps internal errors to appropriate HTTP status codes:
    /// - Network failures: 503 Service Unavailable (504 for timeouts)
    /// - Parse errors and rejected requests: 400 Bad Request
    /// - Everything else: 500 Internal Server Error
    pub fn to_http_status(&self) -> u16 {
        match self {
            ShieldError::NetworkError {
                kind: NetworkFailure::Timeout,
                ..
            } => 504,
            ShieldError::NetworkError { .. } => 503,
            ShieldError::ParseError(_) => 400,
            ShieldError::RejectedRequest(_) => 400,
            ShieldError::HttpError(_) => 502,
            ShieldError::ConfigError(_) => 500,
            ShieldError::CacheError(_) => 500,
            ShieldError::IoError(_) => 500,
            ShieldError::InternalError(_) => 500,
        }
    }
}

impl From<reqwest::Error> for ShieldError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            NetworkFailure::Timeout
        } else if err.is_connect() {
            NetworkFailure::Connect
        } else {
            NetworkFailure::Request
        };
        ShieldError::network(kind, err.to_string())
    }
}
