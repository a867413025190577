//! Authentication for the session server
//!
//! [`AuthChain`] dispatches attempts to the configured per-method handlers;
//! [`AuthorizedKeys`] is a ready-made public key handler backed by OpenSSH
//! `authorized_keys` files.

mod chain;
mod keys;

pub use chain::AuthChain;
pub use keys::{AuthorizedKey, AuthorizedKeys};
