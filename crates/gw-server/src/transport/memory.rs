//! In-process transport
//!
//! Connects a client and the server through channels, with no encryption
//! and no wire format. The client side offers credentials up front; the
//! handshake tries them in order against the server's authenticator, the
//! way an SSH client walks its configured methods.
//!
//! Used by the test suite, and by embedders that want to drive sessions
//! without sockets.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use gw_core::error::TransportError;
use gw_core::traits::{
    AuthAttempt, AuthOutcome, Authenticator, ChannelMux, ChannelSink, Established, Inbound,
    Listener, Transport,
};
use gw_core::PublicKeyBytes;
use gw_protocol::{ChannelId, ChannelRequest, Signal, Window};

/// Pending connections the listener buffers
const BACKLOG: usize = 64;

/// Create a connected listener/connector pair
///
/// The listener reports itself closed once every connector clone is
/// dropped.
pub fn listener() -> (MemoryListener, MemoryConnector) {
    let (tx, rx) = mpsc::channel(BACKLOG);
    (
        MemoryListener { incoming: rx },
        MemoryConnector {
            tx,
            next_peer: Arc::new(AtomicU32::new(1)),
        },
    )
}

/// Credential offered by a memory client
#[derive(Clone)]
pub enum Credential {
    /// Public key (possession is assumed)
    PublicKey(PublicKeyBytes),
    /// Password
    Password(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::PublicKey(key) => f.debug_tuple("PublicKey").field(key).finish(),
            Credential::Password(_) => write!(f, "Password(<redacted>)"),
        }
    }
}

/// Server end of a not yet authenticated memory connection
pub struct MemoryStream {
    user: String,
    credentials: Vec<Credential>,
    verdict: oneshot::Sender<bool>,
    requests: mpsc::UnboundedReceiver<Inbound>,
    events: mpsc::UnboundedSender<ClientEvent>,
    hangup: CancellationToken,
}

/// Accepts memory connections
pub struct MemoryListener {
    incoming: mpsc::Receiver<(MemoryStream, String)>,
}

#[async_trait]
impl Listener for MemoryListener {
    type Stream = MemoryStream;

    async fn accept(&mut self) -> io::Result<Option<(MemoryStream, String)>> {
        Ok(self.incoming.recv().await)
    }
}

/// Client side factory for memory connections
#[derive(Clone)]
pub struct MemoryConnector {
    tx: mpsc::Sender<(MemoryStream, String)>,
    next_peer: Arc<AtomicU32>,
}

impl MemoryConnector {
    /// Connect as `user`, offering `credentials` in order
    ///
    /// Fails with [`TransportError::AuthenticationFailed`] when every
    /// credential was denied.
    pub async fn connect(
        &self,
        user: &str,
        credentials: Vec<Credential>,
    ) -> Result<ClientConnection, TransportError> {
        let (verdict_tx, verdict_rx) = oneshot::channel();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let hangup = CancellationToken::new();

        let stream = MemoryStream {
            user: user.to_string(),
            credentials,
            verdict: verdict_tx,
            requests: request_rx,
            events: event_tx,
            hangup: hangup.clone(),
        };
        let peer = format!("memory:{}", self.next_peer.fetch_add(1, Ordering::Relaxed));

        self.tx
            .send((stream, peer))
            .await
            .map_err(|_| TransportError::ConnectionClosed)?;

        match verdict_rx.await {
            Ok(true) => Ok(ClientConnection {
                requests: request_tx,
                events: event_rx,
                next_channel: AtomicU32::new(0),
                hangup,
            }),
            Ok(false) => Err(TransportError::AuthenticationFailed),
            Err(_) => Err(TransportError::ConnectionClosed),
        }
    }
}

/// Memory transport: authenticates by trying the client's credentials
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryTransport;

#[async_trait]
impl Transport for MemoryTransport {
    type Stream = MemoryStream;
    type Mux = MemoryMux;

    async fn handshake(
        &self,
        stream: MemoryStream,
        peer: &str,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Established<MemoryMux>, TransportError> {
        let MemoryStream {
            user,
            credentials,
            verdict,
            requests,
            events,
            hangup,
        } = stream;

        let mut attempts: Vec<AuthAttempt> = credentials
            .into_iter()
            .map(|credential| match credential {
                Credential::PublicKey(key) => AuthAttempt::public_key(&user, key),
                Credential::Password(password) => AuthAttempt::password(&user, password),
            })
            .collect();
        if attempts.is_empty() {
            attempts.push(AuthAttempt::none(&user));
        }

        for attempt in attempts {
            if let AuthOutcome::Accept(permissions) = authenticator.authenticate(&attempt).await {
                let _ = verdict.send(true);
                return Ok(Established {
                    identity: attempt.identity(),
                    permissions,
                    mux: MemoryMux {
                        requests,
                        sink: Arc::new(MemorySink {
                            events: Mutex::new(Some(events)),
                        }),
                        hangup,
                    },
                });
            }
            tracing::debug!("{} denied {} via {}", peer, user, attempt.method.name());
        }

        let _ = verdict.send(false);
        Err(TransportError::AuthenticationFailed)
    }
}

/// Server side multiplexer of a memory connection
pub struct MemoryMux {
    requests: mpsc::UnboundedReceiver<Inbound>,
    sink: Arc<MemorySink>,
    hangup: CancellationToken,
}

#[async_trait]
impl ChannelMux for MemoryMux {
    async fn accept(&mut self) -> Result<Option<Inbound>, TransportError> {
        tokio::select! {
            biased;
            _ = self.hangup.cancelled() => Ok(None),
            request = self.requests.recv() => Ok(request),
        }
    }

    fn sink(&self) -> Arc<dyn ChannelSink> {
        Arc::clone(&self.sink) as Arc<dyn ChannelSink>
    }

    async fn close(&mut self) {
        self.requests.close();
        self.sink.disconnect();
        self.hangup.cancel();
    }
}

/// Outbound half of a memory connection
struct MemorySink {
    events: Mutex<Option<mpsc::UnboundedSender<ClientEvent>>>,
}

impl MemorySink {
    fn emit(&self, event: ClientEvent) -> Result<(), TransportError> {
        match self.events.lock().as_ref() {
            Some(tx) => tx.send(event).map_err(|_| TransportError::ConnectionClosed),
            None => Err(TransportError::ConnectionClosed),
        }
    }

    fn disconnect(&self) {
        self.events.lock().take();
    }
}

#[async_trait]
impl ChannelSink for MemorySink {
    async fn data(&self, channel: ChannelId, data: Bytes) -> Result<(), TransportError> {
        self.emit(ClientEvent::Data { channel, data })
    }

    async fn extended_data(
        &self,
        channel: ChannelId,
        code: u32,
        data: Bytes,
    ) -> Result<(), TransportError> {
        self.emit(ClientEvent::ExtendedData {
            channel,
            code,
            data,
        })
    }

    async fn exit_status(&self, channel: ChannelId, status: u32) -> Result<(), TransportError> {
        self.emit(ClientEvent::ExitStatus { channel, status })
    }

    async fn eof(&self, channel: ChannelId) -> Result<(), TransportError> {
        self.emit(ClientEvent::Eof { channel })
    }

    async fn close(&self, channel: ChannelId) -> Result<(), TransportError> {
        self.emit(ClientEvent::Close { channel })
    }
}

/// Traffic the server sent to a memory client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Channel stdout
    Data { channel: ChannelId, data: Bytes },
    /// Extended data; code 1 is stderr
    ExtendedData {
        channel: ChannelId,
        code: u32,
        data: Bytes,
    },
    /// Exit status of the session
    ExitStatus { channel: ChannelId, status: u32 },
    /// Server will send no more data
    Eof { channel: ChannelId },
    /// Server closed the channel
    Close { channel: ChannelId },
}

/// Client end of an authenticated memory connection
///
/// Dropping it disconnects, even while [`ClientChannel`]s are still alive.
pub struct ClientConnection {
    requests: mpsc::UnboundedSender<Inbound>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    next_channel: AtomicU32,
    hangup: CancellationToken,
}

impl ClientConnection {
    /// Open a new session channel
    pub async fn open_session(&self) -> Result<ClientChannel, TransportError> {
        let id = ChannelId::new(self.next_channel.fetch_add(1, Ordering::Relaxed));
        if self.open_channel(id).await? {
            Ok(self.channel(id))
        } else {
            Err(TransportError::Rejected)
        }
    }

    /// Send a raw session open for `id`; returns the server's answer
    pub async fn open_channel(&self, id: ChannelId) -> Result<bool, TransportError> {
        self.request(ChannelRequest::OpenSession { channel: id }).await
    }

    /// Address an already open channel
    pub fn channel(&self, id: ChannelId) -> ClientChannel {
        ClientChannel {
            id,
            requests: self.requests.clone(),
        }
    }

    /// Send `request` and wait for the answer
    pub async fn request(&self, request: ChannelRequest) -> Result<bool, TransportError> {
        roundtrip(&self.requests, request).await
    }

    /// Send `request` without asking for an answer
    pub fn send(&self, request: ChannelRequest) -> Result<(), TransportError> {
        fire(&self.requests, request)
    }

    /// Next event from the server; `None` once the server dropped the
    /// connection
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Disconnect
    pub fn disconnect(self) {}
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.hangup.cancel();
    }
}

/// One channel of a [`ClientConnection`]
#[derive(Debug, Clone)]
pub struct ClientChannel {
    id: ChannelId,
    requests: mpsc::UnboundedSender<Inbound>,
}

impl ClientChannel {
    /// Channel ID
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Ask for a PTY
    pub async fn request_pty(&self, term: &str, window: Window) -> Result<bool, TransportError> {
        self.ask(ChannelRequest::PtyRequest {
            channel: self.id,
            term: term.to_string(),
            window,
        })
        .await
    }

    /// Report a new window size
    pub fn window_change(&self, window: Window) -> Result<(), TransportError> {
        self.tell(ChannelRequest::WindowChange {
            channel: self.id,
            window,
        })
    }

    /// Set an environment variable
    pub async fn env(&self, name: &str, value: &str) -> Result<bool, TransportError> {
        self.ask(ChannelRequest::Env {
            channel: self.id,
            name: name.to_string(),
            value: value.to_string(),
        })
        .await
    }

    /// Start a shell
    pub async fn shell(&self) -> Result<bool, TransportError> {
        self.ask(ChannelRequest::Shell { channel: self.id }).await
    }

    /// Run a command
    pub async fn exec(&self, command: &str) -> Result<bool, TransportError> {
        self.ask(ChannelRequest::Exec {
            channel: self.id,
            command: command.to_string(),
        })
        .await
    }

    /// Start a subsystem
    pub async fn subsystem(&self, name: &str) -> Result<bool, TransportError> {
        self.ask(ChannelRequest::Subsystem {
            channel: self.id,
            name: name.to_string(),
        })
        .await
    }

    /// Send a signal
    pub fn signal(&self, signal: Signal) -> Result<(), TransportError> {
        self.tell(signal.to_request(self.id))
    }

    /// Send a signal by raw wire name
    pub fn signal_raw(&self, name: &str) -> Result<(), TransportError> {
        self.tell(ChannelRequest::Signal {
            channel: self.id,
            name: name.to_string(),
        })
    }

    /// Send stdin data
    pub fn data(&self, data: &[u8]) -> Result<(), TransportError> {
        self.tell(ChannelRequest::Data {
            channel: self.id,
            data: Bytes::copy_from_slice(data),
        })
    }

    /// Send EOF
    pub fn eof(&self) -> Result<(), TransportError> {
        self.tell(ChannelRequest::Eof { channel: self.id })
    }

    /// Close the channel
    pub fn close(&self) -> Result<(), TransportError> {
        self.tell(ChannelRequest::Close { channel: self.id })
    }

    async fn ask(&self, request: ChannelRequest) -> Result<bool, TransportError> {
        roundtrip(&self.requests, request).await
    }

    fn tell(&self, request: ChannelRequest) -> Result<(), TransportError> {
        fire(&self.requests, request)
    }
}

async fn roundtrip(
    requests: &mpsc::UnboundedSender<Inbound>,
    request: ChannelRequest,
) -> Result<bool, TransportError> {
    let (inbound, reply) = Inbound::with_reply(request);
    requests
        .send(inbound)
        .map_err(|_| TransportError::ConnectionClosed)?;
    reply.await.map_err(|_| TransportError::ConnectionClosed)
}

fn fire(
    requests: &mpsc::UnboundedSender<Inbound>,
    request: ChannelRequest,
) -> Result<(), TransportError> {
    requests
        .send(Inbound::new(request))
        .map_err(|_| TransportError::ConnectionClosed)
}
