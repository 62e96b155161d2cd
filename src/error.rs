//! Signalling error types

use std::error::Error;
use std::fmt;

/// Signalling-related errors
#[derive(Debug)]
pub enum SignalError {
    /// WebSocket connect/read/write failure
    Transport(String),
    /// Malformed or unexpected wire payload
    Protocol(String),
    /// Gateway- or plugin-reported failure
    Plugin(String),
    /// Operation attempted in the wrong session state
    InvalidState(String),
    /// WebSocket handshake rejected
    Handshake(String),
}

impl fmt::Display for SignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalError::Transport(msg) => write!(f, "Transport error: {}", msg),
            SignalError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            SignalError::Plugin(msg) => write!(f, "Plugin error: {}", msg),
            SignalError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            SignalError::Handshake(msg) => write!(f, "Handshake error: {}", msg),
        }
    }
}

impl Error for SignalError {}

impl From<tokio_tungstenite::tungstenite::Error> for SignalError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SignalError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for SignalError {
    fn from(err: serde_json::Error) -> Self {
        SignalError::Protocol(err.to_string())
    }
}
