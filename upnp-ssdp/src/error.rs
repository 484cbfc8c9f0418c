//! Error types for SSDP sockets and message parsing.

use thiserror::Error;

/// Errors raised while opening SSDP sockets or handling datagrams.
#[derive(Debug, Error)]
pub enum SsdpError {
    /// Socket creation, binding, or send failure
    #[error("ssdp socket error: {0}")]
    Io(#[from] std::io::Error),

    /// A datagram could not be interpreted as an SSDP message
    #[error("ssdp parse error: {0}")]
    Parse(String),

    /// No usable network interface for the requested address family
    #[error("no usable network interface for {0}")]
    NoInterface(&'static str),
}

/// Convenience Result type alias for SSDP operations.
pub type Result<T> = std::result::Result<T, SsdpError>;
