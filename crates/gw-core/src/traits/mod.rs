//! Core trait definitions

mod auth;
mod transport;

pub use auth::{
    AuthAttempt, AuthMethod, AuthOutcome, Authenticator, PasswordHandler, PermissionsCallback,
    PtyCallback, PublicKeyHandler,
};
pub use transport::{ChannelMux, ChannelSink, Established, Inbound, Listener, Transport};
