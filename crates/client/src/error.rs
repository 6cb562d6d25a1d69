//! Client error types.

use thiserror::Error;

use crate::connection::AddressError;

/// Result type alias using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while talking to the telemetry backend.
///
/// None of these are fatal. Inside the event loop each one is turned into
/// the client's last-error string plus a diagnostics line; the `Display`
/// text is exactly what the UI shows.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Socket-level failure reported by the transport.
    #[error("{0}")]
    Transport(String),

    /// A request was rejected locally because there is no live connection.
    #[error("Not connected to backend ({0}).")]
    NotConnected(String),

    /// Inbound payload was malformed or not a JSON object.
    #[error("JSON parse error: {0}")]
    Decode(String),

    /// The backend answered with an explicit `error` field.
    #[error("{0}")]
    Backend(String),

    /// Outbound request could not be serialized.
    #[error("Failed to encode request: {0}")]
    Encode(String),

    /// Invalid backend endpoint.
    #[error("Invalid backend address: {0}")]
    Address(#[from] AddressError),

    /// The client event loop has stopped.
    #[error("Client event loop is not running")]
    ChannelClosed,

    /// The command queue is full; the event loop is running but behind.
    #[error("Client command queue is full")]
    QueueFull,
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
