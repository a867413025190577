//! Core error types for gangway

use gw_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the gangway ecosystem
#[derive(Error, Debug)]
pub enum GwError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Serve error
    #[error("Serve error: {0}")]
    Serve(#[from] ServeError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a transport implementation
#[derive(Error, Debug)]
pub enum TransportError {
    /// Handshake did not complete
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Every authentication attempt was denied
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Handshake did not finish in time
    #[error("Handshake timed out")]
    Timeout,

    /// The underlying connection is gone
    #[error("Connection closed")]
    ConnectionClosed,

    /// The channel is gone or was never open
    #[error("Channel closed")]
    ChannelClosed,

    /// The peer answered a request with a failure
    #[error("Request rejected")]
    Rejected,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Authentication-related errors
///
/// These never reach the remote peer; they only explain a denial locally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The permissions callback refused the user
    #[error("Permissions rejected: {0}")]
    PermissionsRejected(String),
}

/// Session-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Session is closed
    #[error("Session closed")]
    Closed,

    /// A PTY is already allocated for this session
    #[error("PTY already allocated")]
    PtyAlreadyAllocated,

    /// PTY request denied by policy
    #[error("PTY request denied")]
    PtyDenied,

    /// Window dimensions beyond the configured limit
    #[error("Window {width}x{height} exceeds limit {max_width}x{max_height}")]
    WindowTooLarge {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },

    /// Handler already started for this session
    #[error("Session already started")]
    AlreadyStarted,

    /// Request only valid before the handler starts
    #[error("Session already active")]
    AlreadyActive,

    /// Exit status may only be set once
    #[error("Exit status already set")]
    ExitStatusAlreadySet,

    /// Signal receiver was already taken
    #[error("Signal receiver already taken")]
    SignalsTaken,

    /// Outbound write failed in the transport
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// A server option failed validation
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Errors that stop `serve` before or while accepting
#[derive(Error, Debug)]
pub enum ServeError {
    /// Option or configuration rejected at startup
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// No bind address was configured
    #[error("No bind address configured")]
    MissingAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_converts_to_top_level() {
        let err: GwError = SessionError::Closed.into();
        assert_eq!(err.to_string(), "Session error: Session closed");
    }

    #[test]
    fn test_window_too_large_message() {
        let err = SessionError::WindowTooLarge {
            width: 100_000,
            height: 10,
            max_width: 16384,
            max_height: 16384,
        };
        assert_eq!(
            err.to_string(),
            "Window 100000x10 exceeds limit 16384x16384"
        );
    }

    #[test]
    fn test_bind_error_keeps_source() {
        use std::error::Error as _;

        let err = ServeError::Bind {
            addr: "0.0.0.0:22".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.source().is_some());
    }
}
