//! Connection pool implementation

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use gw_core::{ConnectionId, Identity};

use crate::session::SessionManager;

/// Authenticated connections of a server
#[derive(Debug, Default)]
pub struct ConnectionPool {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
}

/// A live, authenticated connection
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Connection identifier
    pub id: ConnectionId,
    /// Remote peer address
    pub peer: String,
    /// Authenticated identity
    pub identity: Arc<Identity>,
    /// When authentication completed
    pub connected_at: Instant,
    sessions: Arc<SessionManager>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: ConnectionId,
        peer: String,
        identity: Arc<Identity>,
        sessions: Arc<SessionManager>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            peer,
            identity,
            connected_at: Instant::now(),
            sessions,
            cancel,
        }
    }

    /// Live sessions of this connection
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Ask the connection to shut down
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether shutdown was requested
    pub fn is_closing(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl ConnectionPool {
    /// Create a new empty connection pool
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, connection: Arc<ConnectionHandle>) {
        self.connections.insert(connection.id, connection);
    }

    pub(crate) fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.remove(&id).map(|(_, conn)| conn)
    }

    /// Get a connection by ID
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&id).map(|r| Arc::clone(&r))
    }

    /// List all connections
    pub fn list(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| Arc::clone(&r)).collect()
    }

    /// Total sessions across all connections
    pub fn session_count(&self) -> usize {
        self.connections.iter().map(|r| r.session_count()).sum()
    }

    /// Ask every connection to shut down
    pub fn close_all(&self) {
        for conn in self.connections.iter() {
            conn.close();
        }
    }

    /// Number of active connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if pool is empty
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
