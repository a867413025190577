//! Channel request types
//!
//! This module defines the requests a transport hands to the session core
//! after decoding them from the wire. They follow the SSH connection
//! protocol (RFC 4254):
//!
//! 1. Client opens a channel (`OpenSession`, or `OpenOther` for any other type)
//! 2. Client optionally sends `PtyRequest` and `Env` requests
//! 3. Client starts the session with `Shell`, `Exec` or `Subsystem`
//! 4. While running: `Data`, `WindowChange` and `Signal` flow in
//! 5. Session end: `Eof` and/or `Close` from the client

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::channel::ChannelId;

/// Terminal dimensions in character cells
///
/// Zero in either dimension is valid and means the client does not know its
/// size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Window {
    /// Number of columns
    pub width: u32,
    /// Number of rows
    pub height: u32,
}

impl Window {
    /// Create a new window size
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// PTY configuration of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pty {
    /// Current window size
    pub window: Window,
    /// Terminal type, e.g. `xterm-256color`
    pub term: String,
}

/// A decoded request arriving on a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelRequest {
    /// Client opens a "session" channel
    OpenSession { channel: ChannelId },

    /// Client opens a channel of any other type (direct-tcpip, x11, ...)
    OpenOther { channel: ChannelId, kind: String },

    /// "pty-req"
    PtyRequest {
        channel: ChannelId,
        term: String,
        window: Window,
    },

    /// "window-change"
    WindowChange { channel: ChannelId, window: Window },

    /// "env"
    Env {
        channel: ChannelId,
        name: String,
        value: String,
    },

    /// "signal", carrying the raw wire token
    Signal { channel: ChannelId, name: String },

    /// "exec"
    Exec { channel: ChannelId, command: String },

    /// "shell"
    Shell { channel: ChannelId },

    /// "subsystem"
    Subsystem { channel: ChannelId, name: String },

    /// Channel data (stdin of the session)
    Data { channel: ChannelId, data: Bytes },

    /// "exit-status" sent by the peer
    ExitStatus { channel: ChannelId, status: u32 },

    /// Peer will send no more data
    Eof { channel: ChannelId },

    /// Peer closed the channel
    Close { channel: ChannelId },
}

impl ChannelRequest {
    /// Channel this request targets
    pub fn channel(&self) -> ChannelId {
        match self {
            ChannelRequest::OpenSession { channel }
            | ChannelRequest::OpenOther { channel, .. }
            | ChannelRequest::PtyRequest { channel, .. }
            | ChannelRequest::WindowChange { channel, .. }
            | ChannelRequest::Env { channel, .. }
            | ChannelRequest::Signal { channel, .. }
            | ChannelRequest::Exec { channel, .. }
            | ChannelRequest::Shell { channel }
            | ChannelRequest::Subsystem { channel, .. }
            | ChannelRequest::Data { channel, .. }
            | ChannelRequest::ExitStatus { channel, .. }
            | ChannelRequest::Eof { channel }
            | ChannelRequest::Close { channel } => *channel,
        }
    }

    /// Request name as used in logs (the RFC 4254 request type where one exists)
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelRequest::OpenSession { .. } => "session",
            ChannelRequest::OpenOther { .. } => "channel-open",
            ChannelRequest::PtyRequest { .. } => "pty-req",
            ChannelRequest::WindowChange { .. } => "window-change",
            ChannelRequest::Env { .. } => "env",
            ChannelRequest::Signal { .. } => "signal",
            ChannelRequest::Exec { .. } => "exec",
            ChannelRequest::Shell { .. } => "shell",
            ChannelRequest::Subsystem { .. } => "subsystem",
            ChannelRequest::Data { .. } => "data",
            ChannelRequest::ExitStatus { .. } => "exit-status",
            ChannelRequest::Eof { .. } => "eof",
            ChannelRequest::Close { .. } => "close",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_accessor() {
        let id = ChannelId::new(9);
        let requests = vec![
            ChannelRequest::OpenSession { channel: id },
            ChannelRequest::WindowChange {
                channel: id,
                window: Window::new(1, 2),
            },
            ChannelRequest::Data {
                channel: id,
                data: Bytes::from_static(b"ls\n"),
            },
            ChannelRequest::Close { channel: id },
        ];

        for request in requests {
            assert_eq!(request.channel(), id);
        }
    }

    #[test]
    fn test_kind_names() {
        let id = ChannelId::new(1);
        assert_eq!(
            ChannelRequest::PtyRequest {
                channel: id,
                term: "xterm".into(),
                window: Window::default(),
            }
            .kind(),
            "pty-req"
        );
        assert_eq!(ChannelRequest::Shell { channel: id }.kind(), "shell");
    }

    #[test]
    fn test_window_default_is_zero() {
        assert_eq!(Window::default(), Window::new(0, 0));
    }

    #[test]
    fn test_window_serde() {
        let json = serde_json::to_string(&Window::new(80, 24)).unwrap();
        assert_eq!(json, r#"{"width":80,"height":24}"#);
    }
}
