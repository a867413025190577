//! Protocol error types

use thiserror::Error;

/// Errors that can occur while interpreting channel requests
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Signal name outside the RFC 4254 vocabulary
    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    /// Channel type other than "session"
    #[error("Unsupported channel type: {0}")]
    UnsupportedChannelType(String),
}
