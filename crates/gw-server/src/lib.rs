//! gw-server: Embeddable SSH session server
//!
//! The server authenticates incoming connections through an [`AuthChain`],
//! turns every accepted "session" channel into a [`Session`] and hands it to
//! the application's [`Handler`]. PTY allocation, window changes, signals
//! and the exit-status/EOF/close sequence are handled here; the handler only
//! reads, writes and returns.
//!
//! The secure transport is pluggable: [`transport::RusshTransport`] runs
//! real SSH over TCP, [`transport::memory`] runs in-process.

pub mod auth;
pub mod connection;
pub mod server;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use auth::{AuthChain, AuthorizedKeys};
pub use connection::{ConnectionHandle, ConnectionPool};
pub use server::options;
pub use server::{listen_and_serve, serve, Server, ServerHandle, ServerOption, ServerSettings};
pub use session::{
    default_handler, handle, set_default_handler, Handler, Launch, Session, SessionState,
};

pub use gw_core::config::{ServerConfig, WindowLimits};
pub use gw_core::error::{AuthError, ConfigError, ServeError, SessionError, TransportError};
pub use gw_core::traits::{PasswordHandler, PermissionsCallback, PtyCallback, PublicKeyHandler};
pub use gw_core::{Identity, Permissions, PublicKeyBytes};
pub use gw_protocol::{ChannelId, Pty, Signal, Window};
