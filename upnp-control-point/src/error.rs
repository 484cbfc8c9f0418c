//! Error types for the upnp-control-point crate.

use callback_server::CallbackError;
use upnp_http::HttpError;
use upnp_ssdp::SsdpError;

use crate::engine::LifecycleState;

/// Errors surfaced by the control point.
///
/// Network failures inside discovery and eventing are recovered locally and
/// never reach the caller; what does reach it are lifecycle misuse, invalid
/// configuration, and failures of calls the caller made directly (such as
/// action invocation or starting the sockets).
#[derive(Debug, thiserror::Error)]
pub enum ControlPointError {
    /// An operation was invoked in a lifecycle state that does not allow it
    #[error("{operation} is not allowed while the control point is {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    /// Invalid configuration provided
    #[error("configuration error: {0}")]
    Config(String),

    /// A description was structurally incomplete
    #[error(transparent)]
    Build(#[from] BuildError),

    /// A description document could not be parsed
    #[error(transparent)]
    Description(#[from] DescriptionError),

    /// A description, SCPD, or icon could not be fetched
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// GENA or SOAP request failure
    #[error(transparent)]
    Http(#[from] HttpError),

    /// SSDP socket failure
    #[error(transparent)]
    Ssdp(#[from] SsdpError),

    /// Event receiver failure
    #[error(transparent)]
    Callback(#[from] CallbackError),

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// An action was invoked with an argument it does not declare as input
    #[error("action {action} has no input argument {argument}")]
    UnknownArgument { action: String, argument: String },

    /// The owning object has already been dropped
    #[error("{0} is no longer available")]
    Unavailable(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Validation failures raised while turning description builders into a device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// A mandatory element was absent or empty
    #[error("{element} is missing mandatory field {field}")]
    MissingField {
        element: &'static str,
        field: &'static str,
    },

    /// The root device UDN does not belong to the announcing uuid
    #[error("UDN {actual} does not match announced uuid {expected}")]
    UdnMismatch { expected: String, actual: String },

    #[error("argument {argument} of action {action} has invalid direction {direction}")]
    InvalidDirection {
        action: String,
        argument: String,
        direction: String,
    },

    #[error("argument {argument} of action {action} refers to unknown state variable {variable}")]
    UnknownStateVariable {
        action: String,
        argument: String,
        variable: String,
    },
}

/// XML documents that could not be deserialized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptionError {
    #[error("failed to parse {document}: {reason}")]
    Xml {
        document: &'static str,
        reason: String,
    },
}

/// Failures of the description fetcher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("GET {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Convenience Result type alias for control point operations.
pub type Result<T> = std::result::Result<T, ControlPointError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_display() {
        let error = ControlPointError::InvalidState {
            operation: "search",
            state: LifecycleState::Initialized,
        };
        assert_eq!(
            error.to_string(),
            "search is not allowed while the control point is initialized"
        );
    }

    #[test]
    fn test_build_error_display() {
        let error = BuildError::MissingField {
            element: "service",
            field: "eventSubURL",
        };
        assert_eq!(error.to_string(), "service is missing mandatory field eventSubURL");

        let error = BuildError::UdnMismatch {
            expected: "uuid:a".to_string(),
            actual: "uuid:b".to_string(),
        };
        assert_eq!(error.to_string(), "UDN uuid:b does not match announced uuid uuid:a");
    }

    #[test]
    fn test_error_conversion() {
        let error: ControlPointError = BuildError::MissingField {
            element: "device",
            field: "UDN",
        }
        .into();
        assert!(matches!(error, ControlPointError::Build(_)));

        let error: ControlPointError = FetchError::Status {
            url: "http://10.0.0.1/d.xml".to_string(),
            status: 404,
        }
        .into();
        assert_eq!(error.to_string(), "GET http://10.0.0.1/d.xml returned HTTP 404");
    }
}
