//! Session handlers
//!
//! A [`Handler`] runs once per started session. Servers use their own
//! handler when one was configured and fall back to the process-wide
//! default otherwise; the lookup happens when each session starts.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;

use gw_protocol::ChannelId;
use gw_core::SessionId;

use super::channel::Session;

/// Application code run for each session
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Serve `session`. Returning ends the session.
    async fn handle(&self, session: Session);
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Session) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, session: Session) {
        self(session).await
    }
}

static DEFAULT_HANDLER: RwLock<Option<Arc<dyn Handler>>> = RwLock::new(None);

/// Install (or with `None`, clear) the process-wide default handler.
/// Returns the previous one.
pub fn set_default_handler(handler: Option<Arc<dyn Handler>>) -> Option<Arc<dyn Handler>> {
    std::mem::replace(&mut *DEFAULT_HANDLER.write(), handler)
}

/// The process-wide default handler, if one is installed
pub fn default_handler() -> Option<Arc<dyn Handler>> {
    DEFAULT_HANDLER.read().clone()
}

/// Install `handler` as the process-wide default
pub fn handle<H: Handler>(handler: H) {
    set_default_handler(Some(Arc::new(handler)));
}

/// Run `handler` on `session`, then report its end to the client
///
/// A panicking handler is contained here; the session then exits with
/// [`super::PANIC_EXIT_STATUS`] unless the handler had set a status.
pub(crate) async fn run_handler(
    handler: Arc<dyn Handler>,
    session: Session,
) -> (ChannelId, SessionId) {
    let done = (session.channel(), session.id());

    let result = AssertUnwindSafe(handler.handle(session.clone()))
        .catch_unwind()
        .await;

    let panicked = result.is_err();
    if panicked {
        tracing::error!(
            "Handler panicked in session {} for {}",
            session.id(),
            session.user()
        );
    }

    session.finish(panicked).await;
    done
}
