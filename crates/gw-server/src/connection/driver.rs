//! Per-connection request loop
//!
//! After the handshake, one task per connection reads requests from the
//! multiplexer in wire order and applies them to the connection's sessions.
//! Handlers run in their own tasks, so a slow handler never stalls the
//! loop. When the peer disconnects or the server closes, every session is
//! closed and handlers get a grace period before they are aborted.

use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use gw_core::error::TransportError;
use gw_core::traits::{Authenticator, ChannelMux, Established, Inbound, Transport};
use gw_core::{ConnectionId, SessionId};
use gw_protocol::{ChannelId, ChannelRequest};

use super::pool::{ConnectionHandle, ConnectionPool};
use crate::server::ServerSettings;
use crate::session::{
    default_handler, run_handler, Delivery, Launch, Session, SessionContext, SessionManager,
};

/// Server-wide state every connection task shares
#[derive(Clone)]
pub(crate) struct ConnectionEnv {
    pub settings: Arc<ServerSettings>,
    pub authenticator: Arc<dyn Authenticator>,
    pub pool: Arc<ConnectionPool>,
}

/// Authenticate `stream` and serve its channels until either side closes
pub(crate) async fn run_connection<T: Transport>(
    transport: Arc<T>,
    env: ConnectionEnv,
    id: ConnectionId,
    stream: T::Stream,
    peer: String,
    cancel: CancellationToken,
) {
    let timeout = env.settings.handshake_timeout;
    let handshake = transport.handshake(stream, &peer, Arc::clone(&env.authenticator));

    let result = tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!("Handshake with {} abandoned: server closing", peer);
            return;
        }
        result = tokio::time::timeout(timeout, handshake) => {
            result.unwrap_or(Err(TransportError::Timeout))
        }
    };

    let Established {
        identity,
        permissions,
        mut mux,
    } = match result {
        Ok(established) => established,
        Err(e) => {
            tracing::warn!("Handshake with {} failed: {}", peer, e);
            return;
        }
    };

    tracing::info!("{} authenticated as {} from {}", id, identity.user, peer);

    let identity = Arc::new(identity);
    let sessions = Arc::new(SessionManager::new());
    env.pool.insert(Arc::new(ConnectionHandle::new(
        id,
        peer.clone(),
        Arc::clone(&identity),
        Arc::clone(&sessions),
        cancel.clone(),
    )));

    let mut connection = Connection {
        id,
        context: SessionContext {
            connection: id,
            identity,
            permissions: Arc::new(permissions),
            remote_addr: Arc::from(peer.as_str()),
            sink: mux.sink(),
            limits: env.settings.window_limits,
        },
        settings: Arc::clone(&env.settings),
        sessions,
        handlers: JoinSet::new(),
        cancel,
    };

    connection.run(&mut mux).await;
    env.pool.remove(id);
}

enum Event {
    Cancelled,
    Inbound(Result<Option<Inbound>, TransportError>),
    HandlerDone(Result<(ChannelId, SessionId), JoinError>),
}

struct Connection {
    id: ConnectionId,
    context: SessionContext,
    settings: Arc<ServerSettings>,
    sessions: Arc<SessionManager>,
    handlers: JoinSet<(ChannelId, SessionId)>,
    cancel: CancellationToken,
}

impl Connection {
    async fn run<M: ChannelMux>(&mut self, mux: &mut M) {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => Event::Cancelled,
                Some(done) = self.handlers.join_next(), if !self.handlers.is_empty() => {
                    Event::HandlerDone(done)
                }
                inbound = mux.accept() => Event::Inbound(inbound),
            };

            match event {
                Event::Cancelled => {
                    tracing::debug!("{} closing on server request", self.id);
                    break;
                }
                Event::HandlerDone(Ok((channel, session))) => {
                    self.sessions.remove_if(channel, session);
                }
                Event::HandlerDone(Err(e)) => {
                    tracing::error!("Handler task on {} failed: {}", self.id, e);
                }
                Event::Inbound(Ok(Some(inbound))) => self.dispatch(inbound).await,
                Event::Inbound(Ok(None)) => {
                    tracing::debug!("{} disconnected by peer", self.id);
                    break;
                }
                Event::Inbound(Err(e)) => {
                    tracing::warn!("{} transport error: {}", self.id, e);
                    break;
                }
            }
        }

        self.teardown(mux).await;
    }

    async fn dispatch(&mut self, mut inbound: Inbound) {
        let channel = inbound.request.channel();

        let accepted = match &inbound.request {
            ChannelRequest::OpenSession { .. } => self.open_session(channel),
            ChannelRequest::OpenOther { kind, .. } => {
                tracing::debug!("Refusing {} channel {} on {}", kind, channel, self.id);
                false
            }
            request => match self.sessions.get(channel) {
                Some(session) => self.session_request(&session, request).await,
                None => {
                    tracing::debug!(
                        "{} request for unknown {} on {}",
                        request.kind(),
                        channel,
                        self.id
                    );
                    false
                }
            },
        };

        inbound.reply(accepted);
    }

    fn open_session(&mut self, channel: ChannelId) -> bool {
        let session = Session::new(channel, &self.context);
        if !self.sessions.insert(session.clone()) {
            tracing::warn!("Duplicate open of {} on {}; refusing", channel, self.id);
            return false;
        }

        tracing::debug!(
            "Opened session {} on {} for {}",
            session.id(),
            channel,
            session.user()
        );
        true
    }

    async fn session_request(&mut self, session: &Session, request: &ChannelRequest) -> bool {
        match request {
            ChannelRequest::PtyRequest { term, window, .. } => {
                match session
                    .request_pty(term, *window, self.settings.pty.as_deref())
                    .await
                {
                    Ok(()) => {
                        tracing::debug!(
                            "PTY {} {}x{} allocated for session {}",
                            term,
                            window.width,
                            window.height,
                            session.id()
                        );
                        true
                    }
                    Err(e) => {
                        tracing::debug!("PTY request for session {} refused: {}", session.id(), e);
                        false
                    }
                }
            }
            ChannelRequest::WindowChange { window, .. } => match session.resize(*window) {
                Ok(_) => true,
                Err(e) => {
                    tracing::debug!("Ignoring window change for {}: {}", session.id(), e);
                    false
                }
            },
            ChannelRequest::Env { name, value, .. } => {
                match session.set_env(name.clone(), value.clone()) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::debug!("Ignoring env {} for {}: {}", name, session.id(), e);
                        false
                    }
                }
            }
            ChannelRequest::Signal { name, .. } => match session.deliver_signal(name) {
                Ok(delivery) => delivery == Delivery::Queued,
                Err(e) => {
                    tracing::debug!("Dropping signal {} for {}: {}", name, session.id(), e);
                    false
                }
            },
            ChannelRequest::Exec { command, .. } => {
                self.start(session, Launch::Exec(command.clone()))
            }
            ChannelRequest::Shell { .. } => self.start(session, Launch::Shell),
            ChannelRequest::Subsystem { name, .. } => {
                self.start(session, Launch::Subsystem(name.clone()))
            }
            ChannelRequest::Data { data, .. } => session.push_stdin(data.clone()).is_ok(),
            ChannelRequest::Eof { .. } => {
                session.stdin_eof();
                true
            }
            ChannelRequest::Close { .. } => {
                if let Some(closed) = self.sessions.remove_if(session.channel(), session.id()) {
                    closed.shutdown();
                    tracing::debug!("Session {} closed by client", closed.id());
                }
                true
            }
            ChannelRequest::ExitStatus { status, .. } => {
                tracing::debug!("Ignoring exit-status {} from client", status);
                false
            }
            ChannelRequest::OpenSession { .. } | ChannelRequest::OpenOther { .. } => false,
        }
    }

    fn start(&mut self, session: &Session, launch: Launch) -> bool {
        let Some(handler) = self.settings.handler.clone().or_else(default_handler) else {
            tracing::warn!(
                "No session handler configured; refusing session {}",
                session.id()
            );
            return false;
        };

        let kind = format!("{:?}", launch);
        if let Err(e) = session.start(launch) {
            tracing::debug!("Session {} not started: {}", session.id(), e);
            return false;
        }
        tracing::info!(
            "Started {} session {} for {}",
            kind,
            session.id(),
            session.user()
        );

        self.handlers.spawn(run_handler(handler, session.clone()));
        true
    }

    async fn teardown<M: ChannelMux>(&mut self, mux: &mut M) {
        let closed = self.sessions.close_all();
        mux.close().await;

        if !self.handlers.is_empty() {
            let grace = self.settings.shutdown_grace;
            let handlers = &mut self.handlers;
            let drained = tokio::time::timeout(grace, async {
                while handlers.join_next().await.is_some() {}
            })
            .await;

            if drained.is_err() {
                tracing::warn!(
                    "{} handlers on {} still running after {:?}; aborting",
                    self.handlers.len(),
                    self.id,
                    grace
                );
                self.handlers.shutdown().await;
            }
        }

        tracing::info!("{} closed ({} sessions closed)", self.id, closed);
    }
}
