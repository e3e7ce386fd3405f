//! Error types for devtun

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for devtun
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or missing debugger URL
    #[error("Validation error: {0}")]
    Validation(String),

    /// Response content-encoding outside {none, gzip, deflate}
    #[error("Not supported content-encoding: {0}")]
    UnsupportedEncoding(String),

    /// Corrupted compressed body
    #[error("Decode error: {0}")]
    Decode(String),

    /// No local port could be obtained
    #[error("Failed to allocate a local port: {0}")]
    PortAllocation(String),

    /// Local server failed to start
    #[error("Failed to start local server: {0}")]
    ServerStart(String),

    /// Tunnel registration or transport error
    #[error("Tunnel error: {0}")]
    Tunnel(String),

    /// Metadata endpoint returned a non-success status
    #[error("Failed to fetch {call}: {status}")]
    Metadata {
        /// Which call failed (`version` or `list`)
        call: &'static str,
        /// Status text reported by the debug target
        status: String,
    },

    /// HTTP-related errors
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// Invalid HTTP request
    #[error("Invalid HTTP request: {0}")]
    InvalidRequest(String),

    /// Upstream connection error
    #[error("Failed to connect to upstream: {0}")]
    UpstreamConnection(String),

    /// Upstream timeout
    #[error("Upstream request timed out")]
    UpstreamTimeout,

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Outbound HTTP client error
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    HttpError(#[from] http::Error),

    /// Internal error (should not happen in production)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convert error to HTTP status code
    pub fn to_status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Http(_) | Error::InvalidRequest(_) | Error::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::UpstreamConnection(_) | Error::Metadata { .. } | Error::Decode(_) => {
                StatusCode::BAD_GATEWAY
            }
            Error::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Error::Authentication(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Create a metadata error for the given call
    pub fn metadata(call: &'static str, status: impl Into<String>) -> Self {
        Error::Metadata {
            call,
            status: status.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            Error::UpstreamConnection("refused".to_string()).to_status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::Authentication("bad credentials".to_string()).to_status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            Error::UpstreamTimeout.to_status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            Error::Tunnel("gone".to_string()).to_status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_metadata_error_message() {
        let err = Error::metadata("list", "Not Found");
        assert_eq!(err.to_string(), "Failed to fetch list: Not Found");
    }

    #[test]
    fn test_unsupported_encoding_message() {
        let err = Error::UnsupportedEncoding("br".to_string());
        assert_eq!(err.to_string(), "Not supported content-encoding: br");
    }
}
