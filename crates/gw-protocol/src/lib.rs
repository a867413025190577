//! gw-protocol: Channel request vocabulary for gangway
//!
//! This crate defines the typed requests that arrive on an SSH session
//! channel (RFC 4254 section 6) once the transport has decoded them, and the
//! closed POSIX signal vocabulary carried by `signal` requests.

pub mod channel;
pub mod error;
pub mod request;
pub mod signal;

pub use channel::ChannelId;
pub use error::ProtocolError;
pub use request::{ChannelRequest, Pty, Window};
pub use signal::Signal;
