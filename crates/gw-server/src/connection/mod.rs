//! Connection handling
//!
//! Each accepted stream becomes one connection task (see `driver`), and
//! every authenticated connection is tracked in the [`ConnectionPool`].

mod driver;
mod pool;

pub use pool::{ConnectionHandle, ConnectionPool};

pub(crate) use driver::{run_connection, ConnectionEnv};
