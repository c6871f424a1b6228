//! Error handling for the ADAM-5000TCP client
//!
//! One error enum covers the transport, protocol, and configuration layers.
//! The polling loop absorbs and logs transport/decode errors instead of
//! propagating them, so most variants only surface through the synchronous
//! call paths and configuration loading.

use thiserror::Error;

/// ADAM-5000TCP client error type
#[derive(Error, Debug, Clone)]
pub enum AdamError {
    /// Socket create/connect/send/recv failures
    #[error("Connection error: {0}")]
    Connection(String),

    /// An explicit I/O deadline elapsed
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Operation attempted while disconnected
    #[error("Not connected")]
    NotConnected,

    /// Slot, channel, or pattern outside the chassis limits
    #[error("Channel error: {0}")]
    Channel(String),

    /// Structurally malformed response buffer
    #[error("Decode error: {0}")]
    Decode(String),

    /// Unreadable or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for ADAM-5000TCP client operations
pub type Result<T> = std::result::Result<T, AdamError>;

// Conversion from std::io::Error
impl From<std::io::Error> for AdamError {
    fn from(err: std::io::Error) -> Self {
        AdamError::Connection(err.to_string())
    }
}

// Conversion from serde_yaml::Error
impl From<serde_yaml::Error> for AdamError {
    fn from(err: serde_yaml::Error) -> Self {
        AdamError::Config(format!("YAML error: {err}"))
    }
}

// Helper methods for creating errors
impl AdamError {
    pub fn connection(msg: impl Into<String>) -> Self {
        AdamError::Connection(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        AdamError::Timeout(msg.into())
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        AdamError::Channel(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        AdamError::Decode(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        AdamError::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            AdamError::connection("refused").to_string(),
            "Connection error: refused"
        );
        assert_eq!(AdamError::NotConnected.to_string(), "Not connected");
        assert_eq!(
            AdamError::channel("slot 9 out of range").to_string(),
            "Channel error: slot 9 out of range"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: AdamError = io.into();
        assert!(matches!(err, AdamError::Connection(_)));
    }
}
