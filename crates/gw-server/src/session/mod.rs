//! Session management
//!
//! Everything that lives on one "session" channel: the [`Session`] object
//! handlers work with, its PTY and signal plumbing, the [`Handler`] trait,
//! and the per-connection [`SessionManager`].

mod channel;
mod handler;
mod manager;
mod pty;
mod signal;

pub use channel::{Launch, Session, SessionState, PANIC_EXIT_STATUS};
pub use handler::{default_handler, handle, set_default_handler, Handler};
pub use manager::SessionManager;
pub use pty::{CapabilityPty, PtyPhase, PtyState};
pub use signal::{Delivery, SignalRouter, Signals, SIGNAL_QUEUE_CAPACITY};

pub(crate) use channel::SessionContext;
pub(crate) use handler::run_handler;
