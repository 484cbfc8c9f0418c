//! Error types for the GENA and SOAP client

use thiserror::Error;

/// Errors that can occur while talking HTTP to a device
#[derive(Debug, Error)]
pub enum HttpError {
    /// Connection, timeout, or transport failure
    #[error("network error: {0}")]
    Network(String),

    /// Response body could not be parsed
    #[error("xml parsing error: {0}")]
    Parse(String),

    /// UPnP error returned inside a SOAP fault
    #[error("soap fault {error_code}: {description}")]
    Fault { error_code: u16, description: String },

    /// Unexpected HTTP status without a SOAP fault body
    #[error("unexpected http status {0}")]
    Status(u16),
}

/// Convenience Result type alias for HTTP operations.
pub type Result<T> = std::result::Result<T, HttpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let fault = HttpError::Fault {
            error_code: 401,
            description: "Invalid Action".to_string(),
        };
        assert_eq!(fault.to_string(), "soap fault 401: Invalid Action");
        assert_eq!(HttpError::Status(503).to_string(), "unexpected http status 503");
        assert_eq!(
            HttpError::Network("connection refused".to_string()).to_string(),
            "network error: connection refused"
        );
    }
}
