//! Transport traits
//!
//! The secure transport (key exchange, ciphers, wire framing) lives outside
//! this workspace's core. A transport plugs in through three seams:
//!
//! - [`Transport::handshake`] turns an accepted stream into an authenticated
//!   connection, asking an [`Authenticator`] about every attempt
//! - [`ChannelMux`] yields the decoded channel requests of that connection
//! - [`ChannelSink`] carries outbound channel traffic back to the peer

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::oneshot;

use gw_protocol::{ChannelId, ChannelRequest};

use super::auth::Authenticator;
use crate::error::TransportError;
use crate::types::{Identity, Permissions};

/// A channel request together with its reply slot
///
/// Requests sent with `want-reply` carry a one-shot sender; the core answers
/// exactly once with accept or deny. Dropping an unanswered `Inbound` reads
/// as a denial on the transport side.
#[derive(Debug)]
pub struct Inbound {
    /// The decoded request
    pub request: ChannelRequest,
    reply: Option<oneshot::Sender<bool>>,
}

impl Inbound {
    /// Request that expects no reply
    pub fn new(request: ChannelRequest) -> Self {
        Self {
            request,
            reply: None,
        }
    }

    /// Request that expects a reply, and the receiver for it
    pub fn with_reply(request: ChannelRequest) -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request,
                reply: Some(tx),
            },
            rx,
        )
    }

    /// Whether the peer is waiting for an answer
    pub fn wants_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Answer the request. Later calls are no-ops.
    pub fn reply(&mut self, accepted: bool) {
        if let Some(tx) = self.reply.take() {
            // Peer may have gone away; nothing to do then
            let _ = tx.send(accepted);
        }
    }
}

/// Outcome of a successful handshake
pub struct Established<M> {
    /// Authenticated identity
    pub identity: Identity,
    /// Permissions granted by the authenticator
    pub permissions: Permissions,
    /// Channel multiplexer of the connection
    pub mux: M,
}

/// A secure transport able to authenticate accepted streams
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Accepted connection type
    type Stream: Send + 'static;
    /// Multiplexer produced by a successful handshake
    type Mux: ChannelMux;

    /// Run the handshake on `stream`, consulting `authenticator` for each
    /// authentication attempt.
    async fn handshake(
        &self,
        stream: Self::Stream,
        peer: &str,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Established<Self::Mux>, TransportError>;
}

/// Source of channel requests for one authenticated connection
#[async_trait]
pub trait ChannelMux: Send + 'static {
    /// Next request, in wire order. `Ok(None)` once the peer disconnected.
    async fn accept(&mut self) -> Result<Option<Inbound>, TransportError>;

    /// Outbound half, shared with every session of the connection
    fn sink(&self) -> Arc<dyn ChannelSink>;

    /// Tear the connection down. Must be idempotent.
    async fn close(&mut self);
}

/// Outbound channel operations
#[async_trait]
pub trait ChannelSink: Send + Sync {
    /// Send channel data (session stdout)
    async fn data(&self, channel: ChannelId, data: Bytes) -> Result<(), TransportError>;

    /// Send extended data; code 1 is stderr
    async fn extended_data(
        &self,
        channel: ChannelId,
        code: u32,
        data: Bytes,
    ) -> Result<(), TransportError>;

    /// Send an "exit-status" request
    async fn exit_status(&self, channel: ChannelId, status: u32) -> Result<(), TransportError>;

    /// Send EOF
    async fn eof(&self, channel: ChannelId) -> Result<(), TransportError>;

    /// Close the channel
    async fn close(&self, channel: ChannelId) -> Result<(), TransportError>;
}

/// Source of accepted streams
#[async_trait]
pub trait Listener: Send + 'static {
    /// Accepted stream type
    type Stream: Send + 'static;

    /// Wait for the next connection.
    ///
    /// `Ok(None)` means the listener is closed and no more connections will
    /// arrive; errors are transient accept failures.
    async fn accept(&mut self) -> std::io::Result<Option<(Self::Stream, String)>>;
}

#[async_trait]
impl Listener for tokio::net::TcpListener {
    type Stream = tokio::net::TcpStream;

    async fn accept(&mut self) -> std::io::Result<Option<(Self::Stream, String)>> {
        let (stream, peer) = tokio::net::TcpListener::accept(self).await?;
        Ok(Some((stream, peer.to_string())))
    }
}

#[cfg(unix)]
#[async_trait]
impl Listener for tokio::net::UnixListener {
    type Stream = tokio::net::UnixStream;

    async fn accept(&mut self) -> std::io::Result<Option<(Self::Stream, String)>> {
        let (stream, peer) = tokio::net::UnixListener::accept(self).await?;
        let peer = peer
            .as_pathname()
            .map(|p| format!("unix:{}", p.display()))
            .unwrap_or_else(|| "unix:unnamed".to_string());
        Ok(Some((stream, peer)))
    }
}
