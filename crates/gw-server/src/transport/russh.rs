//! SSH transport backed by russh
//!
//! russh owns key exchange, ciphers and framing. The adapter below turns
//! its per-connection callbacks into [`Inbound`] requests for the session
//! core and waits for the core's verdict before answering the client.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use russh::server::{Auth, Handle, Handler as RusshHandler, Msg, Session as RusshSession};
use russh::{Channel, ChannelId as RusshChannelId, CryptoVec, Disconnect, Sig};
use russh_keys::key::{KeyPair, PublicKey};
use russh_keys::PublicKeyBase64;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use gw_core::config::ServerConfig;
use gw_core::error::TransportError;
use gw_core::traits::{
    AuthAttempt, AuthOutcome, Authenticator, ChannelMux, ChannelSink, Established, Inbound,
    Transport,
};
use gw_core::{Identity, Permissions, PublicKeyBytes};
use gw_protocol::{ChannelId, ChannelRequest, Window};

/// Channel numbering shared between the russh callbacks and the sink
type ChannelMap = Arc<DashMap<ChannelId, RusshChannelId>>;

/// SSH transport over TCP
#[derive(Clone)]
pub struct RusshTransport {
    config: Arc<russh::server::Config>,
}

impl RusshTransport {
    /// Transport presenting `host_key`, with timing taken from `config`
    pub fn new(host_key: KeyPair, config: &ServerConfig) -> Self {
        let mut ssh = russh::server::Config::default();
        ssh.keys.push(host_key);
        ssh.auth_rejection_time = config.auth_rejection_time;
        ssh.auth_rejection_time_initial = Some(Duration::from_secs(0));

        Self::with_config(ssh)
    }

    /// Transport with a fully custom russh configuration
    pub fn with_config(config: russh::server::Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl Transport for RusshTransport {
    type Stream = TcpStream;
    type Mux = RusshMux;

    async fn handshake(
        &self,
        stream: TcpStream,
        peer: &str,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Established<RusshMux>, TransportError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let channels: ChannelMap = Arc::new(DashMap::new());

        let handler = ConnectionHandler {
            peer: peer.to_string(),
            authenticator,
            accepted: None,
            ready: Some(ready_tx),
            inbound: inbound_tx,
            channels: Arc::clone(&channels),
            local_ids: HashMap::new(),
            next_channel: 0,
        };

        let running = russh::server::run_stream(Arc::clone(&self.config), stream, handler)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        // Disconnects the client if this future is dropped (handshake
        // timeout, server close) or authentication never completes
        let guard = DisconnectGuard::new(running.handle(), peer);

        let peer_name = peer.to_string();
        tokio::spawn(async move {
            match running.await {
                Ok(()) => tracing::debug!("SSH session with {} ended", peer_name),
                Err(e) => tracing::debug!("SSH session with {} ended: {}", peer_name, e),
            }
        });

        let ready = ready_rx
            .await
            .map_err(|_| TransportError::AuthenticationFailed)?;

        Ok(Established {
            identity: ready.identity,
            permissions: ready.permissions,
            mux: RusshMux {
                inbound: inbound_rx,
                sink: Arc::new(RusshSink {
                    handle: guard.disarm(),
                    channels,
                }),
            },
        })
    }
}

/// Result of a completed authentication, handed from russh to the core
struct Authenticated {
    identity: Identity,
    permissions: Permissions,
}

/// Disconnects a russh session on drop unless disarmed
struct DisconnectGuard {
    handle: Handle,
    peer: String,
    armed: bool,
}

impl DisconnectGuard {
    fn new(handle: Handle, peer: &str) -> Self {
        Self {
            handle,
            peer: peer.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) -> Handle {
        self.armed = false;
        self.handle.clone()
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        tracing::debug!("Disconnecting unauthenticated client {}", self.peer);
        let handle = self.handle.clone();
        runtime.spawn(async move {
            let _ = disconnect(&handle, "authentication not completed").await;
        });
    }
}

async fn disconnect(handle: &Handle, reason: &str) -> Result<(), russh::Error> {
    handle
        .disconnect(Disconnect::ByApplication, reason.to_string(), "en".to_string())
        .await
}

/// russh callbacks for one connection
struct ConnectionHandler {
    peer: String,
    authenticator: Arc<dyn Authenticator>,
    accepted: Option<(Identity, Permissions)>,
    ready: Option<oneshot::Sender<Authenticated>>,
    inbound: mpsc::UnboundedSender<Inbound>,
    channels: ChannelMap,
    local_ids: HashMap<RusshChannelId, ChannelId>,
    next_channel: u32,
}

impl ConnectionHandler {
    async fn decide(&mut self, attempt: AuthAttempt) -> Auth {
        match self.authenticator.authenticate(&attempt).await {
            AuthOutcome::Accept(permissions) => {
                self.accepted = Some((attempt.identity(), permissions));
                Auth::Accept
            }
            AuthOutcome::Deny => {
                tracing::debug!(
                    "Rejected {} auth for {} from {}",
                    attempt.method.name(),
                    attempt.user,
                    self.peer
                );
                Auth::Reject {
                    proceed_with_methods: None,
                }
            }
        }
    }

    /// Forward a request that expects no answer
    fn tell(&self, request: ChannelRequest) {
        if self.inbound.send(Inbound::new(request)).is_err() {
            tracing::trace!("Dropping request from {}: connection closing", self.peer);
        }
    }

    /// Forward a request and wait for the core's verdict
    async fn ask(&self, request: ChannelRequest) -> bool {
        let (inbound, reply) = Inbound::with_reply(request);
        if self.inbound.send(inbound).is_err() {
            return false;
        }
        reply.await.unwrap_or(false)
    }

    /// Ask, then answer the client with success or failure
    async fn ask_and_reply(
        &self,
        request: ChannelRequest,
        channel: RusshChannelId,
        session: &mut RusshSession,
    ) {
        if self.ask(request).await {
            session.channel_success(channel);
        } else {
            session.channel_failure(channel);
        }
    }

    fn local_id(&self, channel: RusshChannelId) -> Option<ChannelId> {
        self.local_ids.get(&channel).copied()
    }

    fn forget(&mut self, channel: RusshChannelId) -> Option<ChannelId> {
        let id = self.local_ids.remove(&channel)?;
        self.channels.remove(&id);
        Some(id)
    }
}

fn signal_name(signal: Sig) -> String {
    match signal {
        Sig::Custom(name) => name,
        // Standard variants debug-print as their wire token, e.g. `INT`
        other => format!("{:?}", other),
    }
}

#[async_trait]
impl RusshHandler for ConnectionHandler {
    type Error = anyhow::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        Ok(self.decide(AuthAttempt::none(user)).await)
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        Ok(self.decide(AuthAttempt::password(user, password)).await)
    }

    /// Called after russh verified the signature, so possession is proven
    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let key = PublicKeyBytes::from(public_key.public_key_bytes());
        Ok(self.decide(AuthAttempt::public_key(user, key)).await)
    }

    async fn auth_succeeded(&mut self, _session: &mut RusshSession) -> Result<(), Self::Error> {
        if let (Some(ready), Some((identity, permissions))) =
            (self.ready.take(), self.accepted.take())
        {
            let _ = ready.send(Authenticated {
                identity,
                permissions,
            });
        }
        Ok(())
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut RusshSession,
    ) -> Result<bool, Self::Error> {
        let remote = channel.id();
        let id = ChannelId::new(self.next_channel);
        self.next_channel = self.next_channel.wrapping_add(1);

        self.local_ids.insert(remote, id);
        self.channels.insert(id, remote);

        let accepted = self.ask(ChannelRequest::OpenSession { channel: id }).await;
        if !accepted {
            self.forget(remote);
        }
        Ok(accepted)
    }

    async fn pty_request(
        &mut self,
        channel: RusshChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        match self.local_id(channel) {
            Some(id) => {
                let request = ChannelRequest::PtyRequest {
                    channel: id,
                    term: term.to_string(),
                    window: Window::new(col_width, row_height),
                };
                self.ask_and_reply(request, channel, session).await;
            }
            None => session.channel_failure(channel),
        }
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: RusshChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        if let Some(id) = self.local_id(channel) {
            self.tell(ChannelRequest::WindowChange {
                channel: id,
                window: Window::new(col_width, row_height),
            });
        }
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: RusshChannelId,
        variable_name: &str,
        variable_value: &str,
        _session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        if let Some(id) = self.local_id(channel) {
            self.tell(ChannelRequest::Env {
                channel: id,
                name: variable_name.to_string(),
                value: variable_value.to_string(),
            });
        }
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: RusshChannelId,
        session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        match self.local_id(channel) {
            Some(id) => {
                self.ask_and_reply(ChannelRequest::Shell { channel: id }, channel, session)
                    .await
            }
            None => session.channel_failure(channel),
        }
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: RusshChannelId,
        data: &[u8],
        session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        match self.local_id(channel) {
            Some(id) => {
                let request = ChannelRequest::Exec {
                    channel: id,
                    command: String::from_utf8_lossy(data).into_owned(),
                };
                self.ask_and_reply(request, channel, session).await;
            }
            None => session.channel_failure(channel),
        }
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: RusshChannelId,
        name: &str,
        session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        match self.local_id(channel) {
            Some(id) => {
                let request = ChannelRequest::Subsystem {
                    channel: id,
                    name: name.to_string(),
                };
                self.ask_and_reply(request, channel, session).await;
            }
            None => session.channel_failure(channel),
        }
        Ok(())
    }

    async fn signal(
        &mut self,
        channel: RusshChannelId,
        signal: Sig,
        _session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        if let Some(id) = self.local_id(channel) {
            self.tell(ChannelRequest::Signal {
                channel: id,
                name: signal_name(signal),
            });
        }
        Ok(())
    }

    async fn data(
        &mut self,
        channel: RusshChannelId,
        data: &[u8],
        _session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        if let Some(id) = self.local_id(channel) {
            self.tell(ChannelRequest::Data {
                channel: id,
                data: Bytes::copy_from_slice(data),
            });
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: RusshChannelId,
        _session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        if let Some(id) = self.local_id(channel) {
            self.tell(ChannelRequest::Eof { channel: id });
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: RusshChannelId,
        _session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        if let Some(id) = self.forget(channel) {
            self.tell(ChannelRequest::Close { channel: id });
        }
        Ok(())
    }
}

/// Channel requests of one russh connection
pub struct RusshMux {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    sink: Arc<RusshSink>,
}

#[async_trait]
impl ChannelMux for RusshMux {
    async fn accept(&mut self) -> Result<Option<Inbound>, TransportError> {
        Ok(self.inbound.recv().await)
    }

    fn sink(&self) -> Arc<dyn ChannelSink> {
        Arc::clone(&self.sink) as Arc<dyn ChannelSink>
    }

    /// Closes every open channel, then disconnects the client
    async fn close(&mut self) {
        self.inbound.close();
        // Pending requests read as denied, releasing callbacks waiting on them
        while self.inbound.try_recv().is_ok() {}

        self.sink.close_all().await;
        if let Err(e) = disconnect(&self.sink.handle, "server closing").await {
            tracing::trace!("Disconnect after session end: {}", e);
        }
    }
}

struct RusshSink {
    handle: Handle,
    channels: ChannelMap,
}

impl RusshSink {
    fn remote(&self, channel: ChannelId) -> Result<RusshChannelId, TransportError> {
        self.channels
            .get(&channel)
            .map(|r| *r)
            .ok_or(TransportError::ChannelClosed)
    }

    async fn close_all(&self) {
        let open: Vec<RusshChannelId> = self.channels.iter().map(|r| *r.value()).collect();
        self.channels.clear();
        for channel in open {
            let _ = self.handle.close(channel).await;
        }
    }
}

#[async_trait]
impl ChannelSink for RusshSink {
    async fn data(&self, channel: ChannelId, data: Bytes) -> Result<(), TransportError> {
        let remote = self.remote(channel)?;
        self.handle
            .data(remote, CryptoVec::from_slice(&data))
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn extended_data(
        &self,
        channel: ChannelId,
        code: u32,
        data: Bytes,
    ) -> Result<(), TransportError> {
        let remote = self.remote(channel)?;
        self.handle
            .extended_data(remote, code, CryptoVec::from_slice(&data))
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn exit_status(&self, channel: ChannelId, status: u32) -> Result<(), TransportError> {
        let remote = self.remote(channel)?;
        self.handle
            .exit_status_request(remote, status)
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn eof(&self, channel: ChannelId) -> Result<(), TransportError> {
        let remote = self.remote(channel)?;
        self.handle
            .eof(remote)
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn close(&self, channel: ChannelId) -> Result<(), TransportError> {
        let (_, remote) = self
            .channels
            .remove(&channel)
            .ok_or(TransportError::ChannelClosed)?;
        self.handle
            .close(remote)
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }
}

/// Load the host key at `path`, creating it with `ssh-keygen` if missing
///
/// Falls back to an in-memory key when generation fails; clients will then
/// see a new host key after every restart.
pub async fn load_or_generate_host_key(path: &Path) -> Result<KeyPair> {
    if !path.exists() {
        tracing::info!("Generating new host key at {:?}", path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let generated = tokio::process::Command::new("ssh-keygen")
            .args(["-q", "-t", "ed25519", "-N", "", "-C", "gangway-host-key", "-f"])
            .arg(path)
            .status()
            .await;

        match generated {
            Ok(status) if status.success() => {}
            Ok(status) => {
                tracing::warn!("ssh-keygen exited with {}; using an ephemeral host key", status);
                return ephemeral_host_key();
            }
            Err(e) => {
                tracing::warn!("Failed to run ssh-keygen ({}); using an ephemeral host key", e);
                return ephemeral_host_key();
            }
        }
    }

    tracing::info!("Loading host key from {:?}", path);
    russh_keys::load_secret_key(path, None)
        .with_context(|| format!("Failed to load host key from {:?}", path))
}

fn ephemeral_host_key() -> Result<KeyPair> {
    KeyPair::generate_ed25519().ok_or_else(|| anyhow::anyhow!("Failed to generate Ed25519 key"))
}

/// `SHA256:` fingerprint of a key pair's public half
pub fn host_key_fingerprint(key: &KeyPair) -> Option<String> {
    key.clone_public_key().ok().map(|public| public.fingerprint())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(Sig::INT), "INT");
        assert_eq!(signal_name(Sig::TERM), "TERM");
        assert_eq!(signal_name(Sig::Custom("USR2".to_string())), "USR2");
    }

    #[test]
    fn test_transport_carries_host_key() {
        let key = ephemeral_host_key().unwrap();
        let config = ServerConfig::default();
        let transport = RusshTransport::new(key, &config);
        assert_eq!(transport.config.keys.len(), 1);
        assert_eq!(transport.config.auth_rejection_time, config.auth_rejection_time);
    }

    #[tokio::test]
    async fn test_host_key_persisted_or_ephemeral() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("host_key");

        let first = load_or_generate_host_key(&path).await.unwrap();
        assert!(host_key_fingerprint(&first).is_some());

        if path.exists() {
            // ssh-keygen was available: the same key comes back
            let second = load_or_generate_host_key(&path).await.unwrap();
            assert_eq!(host_key_fingerprint(&first), host_key_fingerprint(&second));
        }
    }
}
