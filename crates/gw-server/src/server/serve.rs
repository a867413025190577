//! Session server
//!
//! Accepts connections from a [`Listener`] and runs each one in its own
//! task. Transient accept errors are retried with exponential backoff; a
//! closed listener or [`Server::close`] stops the loop, after which every
//! live connection is closed and drained.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use gw_core::error::{ConfigError, ServeError};
use gw_core::traits::{Listener, Transport};
use gw_core::ConnectionId;

use super::options::{self, ServerOption, ServerSettings};
use crate::connection::{run_connection, ConnectionEnv, ConnectionPool};
use crate::session::{default_handler, Handler};

/// First delay after a failed accept
pub const MIN_ACCEPT_BACKOFF: Duration = Duration::from_millis(5);
/// Longest delay between failed accepts
pub const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Extra time allowed past the handler grace period when draining
const DRAIN_MARGIN: Duration = Duration::from_secs(1);

/// Delay before the next accept attempt
pub fn next_backoff(current: Option<Duration>) -> Duration {
    match current {
        None => MIN_ACCEPT_BACKOFF,
        Some(delay) => (delay * 2).min(MAX_ACCEPT_BACKOFF),
    }
}

/// Embeddable session server over transport `T`
pub struct Server<T: Transport> {
    transport: Arc<T>,
    settings: ServerSettings,
    pool: Arc<ConnectionPool>,
    shutdown: CancellationToken,
    next_id: AtomicU64,
}

/// Cloneable handle for closing a running server
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shutdown: CancellationToken,
    pool: Arc<ConnectionPool>,
}

impl ServerHandle {
    /// Stop accepting and close every connection
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Whether close was requested
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Live connections
    pub fn connections(&self) -> &ConnectionPool {
        &self.pool
    }
}

enum Accept<S> {
    Shutdown,
    Incoming(std::io::Result<Option<(S, String)>>),
    Finished(Result<(), JoinError>),
}

impl<T: Transport> Server<T> {
    /// Server with default settings
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            settings: ServerSettings::default(),
            pool: Arc::new(ConnectionPool::new()),
            shutdown: CancellationToken::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Server with `handler` (or the default handler, if `None`) and
    /// `options` applied in order
    pub fn with_options(
        transport: T,
        handler: Option<Arc<dyn Handler>>,
        options: impl IntoIterator<Item = ServerOption>,
    ) -> Result<Self, ConfigError> {
        let mut server = Self::new(transport);
        server.settings.handler = handler;
        for option in options {
            server.set_option(option)?;
        }
        Ok(server)
    }

    /// Apply one option
    pub fn set_option(&mut self, option: ServerOption) -> Result<(), ConfigError> {
        option.apply(&mut self.settings)
    }

    /// Current settings
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Live connections
    pub fn connections(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Handle for closing the server from elsewhere
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.shutdown.clone(),
            pool: Arc::clone(&self.pool),
        }
    }

    /// Stop accepting and close every connection
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Whether close was requested
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Accept connections from `listener` until it closes or the server is
    /// closed. Returns once every connection has been torn down.
    pub async fn serve<L>(&self, mut listener: L) -> Result<(), ServeError>
    where
        L: Listener<Stream = T::Stream>,
    {
        let settings = Arc::new(self.settings.clone());
        if settings.handler.is_none() && default_handler().is_none() {
            tracing::warn!("No session handler configured; sessions will be refused");
        }

        let env = ConnectionEnv {
            authenticator: Arc::new(settings.auth_chain()),
            settings: Arc::clone(&settings),
            pool: Arc::clone(&self.pool),
        };

        let serving = self.shutdown.child_token();
        let mut connections = JoinSet::new();
        let mut backoff = None;

        loop {
            let event = tokio::select! {
                _ = serving.cancelled() => Accept::Shutdown,
                Some(done) = connections.join_next(), if !connections.is_empty() => {
                    Accept::Finished(done)
                }
                accepted = listener.accept() => Accept::Incoming(accepted),
            };

            match event {
                Accept::Shutdown => {
                    tracing::info!("Server shutting down");
                    break;
                }
                Accept::Finished(Err(e)) if e.is_panic() => {
                    tracing::error!("Connection task panicked: {}", e);
                }
                Accept::Finished(_) => {}
                Accept::Incoming(Ok(Some((stream, peer)))) => {
                    backoff = None;
                    let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
                    tracing::debug!("Accepted {} from {}", id, peer);

                    connections.spawn(run_connection(
                        Arc::clone(&self.transport),
                        env.clone(),
                        id,
                        stream,
                        peer,
                        serving.child_token(),
                    ));
                }
                Accept::Incoming(Ok(None)) => {
                    tracing::info!("Listener closed");
                    break;
                }
                Accept::Incoming(Err(e)) => {
                    let delay = next_backoff(backoff);
                    backoff = Some(delay);
                    tracing::warn!("Accept error: {}; retrying in {:?}", e, delay);

                    tokio::select! {
                        _ = serving.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        serving.cancel();

        let deadline = settings.shutdown_grace + DRAIN_MARGIN;
        let drained = tokio::time::timeout(deadline, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                "{} connections still open after {:?}; aborting",
                connections.len(),
                deadline
            );
            connections.shutdown().await;
        }

        tracing::info!("Server stopped");
        Ok(())
    }
}

impl<T> Server<T>
where
    T: Transport<Stream = TcpStream>,
{
    /// Bind the configured address and serve on it
    pub async fn listen_and_serve(&self) -> Result<(), ServeError> {
        let addr = self
            .settings
            .address
            .clone()
            .ok_or(ServeError::MissingAddress)?;

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServeError::Bind {
                addr: addr.clone(),
                source,
            })?;

        match listener.local_addr() {
            Ok(local) => tracing::info!("Session server listening on {}", local),
            Err(_) => tracing::info!("Session server listening on {}", addr),
        }

        self.serve(listener).await
    }
}

/// Serve `listener` with a server built from `handler` and `options`
///
/// An option that fails validation aborts before anything is accepted.
pub async fn serve<T, L>(
    transport: T,
    listener: L,
    handler: Option<Arc<dyn Handler>>,
    options: impl IntoIterator<Item = ServerOption>,
) -> Result<(), ServeError>
where
    T: Transport,
    L: Listener<Stream = T::Stream>,
{
    let server = Server::with_options(transport, handler, options)?;
    server.serve(listener).await
}

/// Bind `addr` and serve it with a server built from `handler` and `options`
pub async fn listen_and_serve<T>(
    transport: T,
    addr: &str,
    handler: Option<Arc<dyn Handler>>,
    options: impl IntoIterator<Item = ServerOption>,
) -> Result<(), ServeError>
where
    T: Transport<Stream = TcpStream>,
{
    let options = std::iter::once(options::address(addr)).chain(options);
    let server = Server::with_options(transport, handler, options)?;
    server.listen_and_serve().await
}
