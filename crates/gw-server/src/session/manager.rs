//! Session registry of one connection

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use gw_core::SessionId;
use gw_protocol::ChannelId;

use super::channel::Session;

/// Live sessions of a connection, by channel
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: DashMap<ChannelId, Session>,
}

impl SessionManager {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` under its channel. Returns false, and registers
    /// nothing, if the channel already has a live session.
    pub fn insert(&self, session: Session) -> bool {
        match self.sessions.entry(session.channel()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    /// Get the session on `channel`
    pub fn get(&self, channel: ChannelId) -> Option<Session> {
        self.sessions.get(&channel).map(|r| r.clone())
    }

    /// Remove and return the session on `channel`
    pub fn remove(&self, channel: ChannelId) -> Option<Session> {
        self.sessions.remove(&channel).map(|(_, session)| session)
    }

    /// Remove the session on `channel` only if it is session `id`
    ///
    /// Channel numbers are reused after close; this keeps a late cleanup
    /// from evicting the channel's next session.
    pub fn remove_if(&self, channel: ChannelId, id: SessionId) -> Option<Session> {
        self.sessions
            .remove_if(&channel, |_, session| session.id() == id)
            .map(|(_, session)| session)
    }

    /// List all sessions
    pub fn list(&self) -> Vec<Session> {
        self.sessions.iter().map(|r| r.clone()).collect()
    }

    /// Close and forget every session. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let sessions = self.list();
        self.sessions.clear();

        sessions.iter().filter(|session| session.shutdown()).count()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
