//! Signal routing from the client to the session handler
//!
//! Signals are queued in a bounded channel. The connection loop never waits
//! on a slow handler: when the queue is full the signal is dropped and
//! logged. Unknown signal names are dropped the same way.

use parking_lot::Mutex;
use tokio::sync::mpsc;

use gw_protocol::Signal;

/// Signals queued per session before new ones are dropped
pub const SIGNAL_QUEUE_CAPACITY: usize = 64;

/// What happened to a delivered signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the handler
    Queued,
    /// Queue full or closed; signal discarded
    Dropped,
    /// Name outside the signal vocabulary; discarded
    Unknown,
}

/// Per-session signal queue
#[derive(Debug)]
pub struct SignalRouter {
    tx: Mutex<Option<mpsc::Sender<Signal>>>,
    rx: Mutex<Option<mpsc::Receiver<Signal>>>,
}

impl SignalRouter {
    /// Router with the default queue capacity
    pub fn new() -> Self {
        Self::with_capacity(SIGNAL_QUEUE_CAPACITY)
    }

    /// Router with a custom queue capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Queue `signal` without waiting
    pub fn deliver(&self, signal: Signal) -> Delivery {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Delivery::Dropped;
        };

        match tx.try_send(signal) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(signal)) => {
                tracing::warn!("Signal queue full, dropping {}", signal);
                Delivery::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(signal)) => {
                tracing::debug!("Signal receiver gone, dropping {}", signal);
                Delivery::Dropped
            }
        }
    }

    /// Queue a signal given by its wire token, e.g. `INT`
    pub fn deliver_wire(&self, token: &str) -> Delivery {
        match Signal::from_wire(token) {
            Some(signal) => self.deliver(signal),
            None => {
                tracing::debug!("Ignoring unknown signal {:?}", token);
                Delivery::Unknown
            }
        }
    }

    /// Take the receiving end. Only the first call gets it.
    pub fn take_receiver(&self) -> Option<Signals> {
        self.rx.lock().take().map(|rx| Signals { rx })
    }

    /// Stop accepting signals; a waiting receiver sees the end of the stream
    /// once it has drained what was queued.
    pub fn close(&self) {
        self.tx.lock().take();
    }
}

impl Default for SignalRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a session's signals
#[derive(Debug)]
pub struct Signals {
    rx: mpsc::Receiver<Signal>,
}

impl Signals {
    /// Wait for the next signal. `None` once the session is closed.
    pub async fn recv(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }

    /// Next queued signal, without waiting
    pub fn try_recv(&mut self) -> Option<Signal> {
        self.rx.try_recv().ok()
    }
}
