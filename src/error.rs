use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the relay and the peer-side protocol
#[derive(Error, Debug)]
pub enum P2PError {
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Errors surfaced by the signaling relay
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// No live peer owns the requested short ID
    #[error("Peer '{short_id}' not found")]
    PeerNotFound { short_id: String },

    /// The relay link to the server is gone
    #[error("Relay link closed")]
    LinkClosed,
}

/// Errors raised while bringing the peer channel up
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// Operation attempted before the channel reached `Open`
    #[error("Link not ready")]
    LinkNotReady,

    /// Offer/answer/candidate exchange never reached `Open`
    #[error("Negotiation failed: {reason}")]
    NegotiationFailed { reason: String },

    /// Event arrived in a state that cannot accept it
    #[error("Cannot {operation} while {state}")]
    InvalidState { state: String, operation: String },

    /// The transport collaborator reported an error
    #[error("Transport error: {message}")]
    Transport { message: String },
}

/// Errors raised by the transfer protocol engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Link not ready")]
    LinkNotReady,

    /// Channel closed mid-stream; partial data was discarded
    #[error("Transfer {file_id} aborted: {reason}")]
    TransferAborted { file_id: String, reason: String },

    #[error("Sending {file_id} failed: {reason}")]
    SendFailed { file_id: String, reason: String },
}

/// Wire-level decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed data frame: {reason}")]
    MalformedFrame { reason: String },

    #[error("Unrecognized control message: {reason}")]
    UnknownControlMessage { reason: String },

    #[error("Failed to encode control message: {reason}")]
    Encode { reason: String },
}

/// Configuration loading and validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Configuration file not found: '{}'", path.display())]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration file: {reason}")]
    Parse { reason: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl From<toml::de::Error> for P2PError {
    fn from(err: toml::de::Error) -> Self {
        P2PError::Configuration(ConfigurationError::Parse {
            reason: err.to_string(),
        })
    }
}

/// Convenience Result type with P2PError
pub type Result<T> = std::result::Result<T, P2PError>;
