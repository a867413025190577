//! Test doubles shared by unit tests

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

use gw_core::error::TransportError;
use gw_core::traits::ChannelSink;
use gw_core::{ConnectionId, Identity, Permissions};
use gw_protocol::ChannelId;

use crate::session::SessionContext;

/// Outbound operation observed by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Data(ChannelId, Bytes),
    Stderr(ChannelId, Bytes),
    ExitStatus(ChannelId, u32),
    Eof(ChannelId),
    Close(ChannelId),
}

/// Sink that records everything sent through it
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    fn push(&self, event: SinkEvent) -> Result<(), TransportError> {
        self.events.lock().push(event);
        Ok(())
    }
}

#[async_trait]
impl ChannelSink for RecordingSink {
    async fn data(&self, channel: ChannelId, data: Bytes) -> Result<(), TransportError> {
        self.push(SinkEvent::Data(channel, data))
    }

    async fn extended_data(
        &self,
        channel: ChannelId,
        _code: u32,
        data: Bytes,
    ) -> Result<(), TransportError> {
        self.push(SinkEvent::Stderr(channel, data))
    }

    async fn exit_status(&self, channel: ChannelId, status: u32) -> Result<(), TransportError> {
        self.push(SinkEvent::ExitStatus(channel, status))
    }

    async fn eof(&self, channel: ChannelId) -> Result<(), TransportError> {
        self.push(SinkEvent::Eof(channel))
    }

    async fn close(&self, channel: ChannelId) -> Result<(), TransportError> {
        self.push(SinkEvent::Close(channel))
    }
}

/// Session context for user `alice` backed by a fresh recording sink
pub fn context(permissions: Permissions) -> (SessionContext, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let context = SessionContext {
        connection: ConnectionId(1),
        identity: Arc::new(Identity::new("alice")),
        permissions: Arc::new(permissions),
        remote_addr: Arc::from("127.0.0.1:50000"),
        sink: Arc::clone(&sink) as Arc<dyn ChannelSink>,
        limits: Default::default(),
    };
    (context, sink)
}
