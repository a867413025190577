//! Transports the session server can run on
//!
//! [`RusshTransport`] speaks SSH over TCP. The [`memory`] transport wires a
//! client to the server in-process.

pub mod memory;
mod russh;

pub use self::russh::{
    host_key_fingerprint, load_or_generate_host_key, RusshMux, RusshTransport,
};
