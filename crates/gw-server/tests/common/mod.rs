//! Shared harness for the integration tests
//!
//! Runs a [`Server`] over the memory transport in a background task.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;

use gw_core::PublicKeyBytes;
use gw_server::transport::memory::{self, ClientEvent, MemoryConnector, MemoryTransport};
use gw_server::{Handler, ServeError, Server, ServerHandle, ServerOption};

/// How long any single step may take before a test fails
pub const STEP: Duration = Duration::from_secs(5);

/// Key trusted by [`authorized`]
pub fn trusted_key() -> PublicKeyBytes {
    PublicKeyBytes::from(vec![0x11; 32])
}

/// Key nobody trusts
pub fn stranger_key() -> PublicKeyBytes {
    PublicKeyBytes::from(vec![0x22; 32])
}

/// Authorized keys holding only [`trusted_key`]
pub fn authorized() -> gw_server::AuthorizedKeys {
    let mut keys = gw_server::AuthorizedKeys::new();
    keys.add_key(trusted_key(), Some("test@gangway".to_string()));
    keys
}

/// A server running in the background
pub struct TestServer {
    pub handle: ServerHandle,
    pub connector: MemoryConnector,
    pub task: JoinHandle<Result<(), ServeError>>,
}

impl TestServer {
    /// Start a server with `handler` and `options`
    pub fn start(handler: Option<Arc<dyn Handler>>, options: Vec<ServerOption>) -> Self {
        let (listener, connector) = memory::listener();
        let server = Server::with_options(MemoryTransport, handler, options)
            .expect("options should be valid");
        let handle = server.handle();
        let task = tokio::spawn(async move { server.serve(listener).await });

        Self {
            handle,
            connector,
            task,
        }
    }

    /// Close the server and wait for `serve` to return
    pub async fn stop(self) -> Result<(), ServeError> {
        self.handle.close();
        timeout(STEP, self.task)
            .await
            .expect("serve did not return in time")
            .expect("serve task panicked")
    }
}

/// Poll `condition` until it holds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(STEP, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Next client event, failing the test on timeout
pub async fn next_event(client: &mut memory::ClientConnection) -> Option<ClientEvent> {
    timeout(STEP, client.next_event())
        .await
        .expect("no event in time")
}
