//! gw-core: Core abstractions and configuration for gangway
//!
//! This crate provides the shared types, the transport and authentication
//! seams, constant-time key comparison and the configuration structures used
//! by the session server.

pub mod config;
pub mod error;
pub mod keys;
pub mod traits;
pub mod types;

pub use error::GwError;
pub use keys::{keys_equal, secrets_equal};
pub use types::{ConnectionId, Identity, Permissions, PublicKeyBytes, SessionId};
