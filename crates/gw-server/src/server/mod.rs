//! Server entry points and options

pub mod options;
mod serve;

pub use options::{ServerOption, ServerSettings};
pub use serve::{
    listen_and_serve, next_backoff, serve, Server, ServerHandle, MAX_ACCEPT_BACKOFF,
    MIN_ACCEPT_BACKOFF,
};
