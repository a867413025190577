//! Core domain types

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use uuid::Uuid;

/// Capability flag granting PTY allocation (see `CapabilityPty`)
pub const PTY_CAPABILITY: &str = "pty";

/// Unique identifier for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a fresh random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for an accepted connection, unique per server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Raw serialized public key, as sent by the client
///
/// Deliberately not `PartialEq`: compare keys with [`crate::keys_equal`],
/// which runs in constant time.
#[derive(Clone)]
pub struct PublicKeyBytes(Bytes);

impl PublicKeyBytes {
    /// Wrap raw key bytes
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Raw bytes of the key
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// SHA-256 fingerprint, hex encoded with a `SHA256:` prefix
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.0);
        format!("SHA256:{}", hex::encode(digest))
    }
}

impl fmt::Debug for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKeyBytes")
            .field(&self.fingerprint())
            .finish()
    }
}

impl From<Vec<u8>> for PublicKeyBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for PublicKeyBytes {
    fn from(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }
}

/// Who is on the other end of a connection, fixed once the handshake completes
#[derive(Debug, Clone)]
pub struct Identity {
    /// Requested user name
    pub user: String,
    /// Key the client authenticated with, if any
    pub public_key: Option<PublicKeyBytes>,
}

impl Identity {
    /// Identity for a password (or otherwise keyless) login
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            public_key: None,
        }
    }

    /// Identity for a public key login
    pub fn with_key(user: impl Into<String>, key: PublicKeyBytes) -> Self {
        Self {
            user: user.into(),
            public_key: Some(key),
        }
    }
}

/// Capability and extension data granted to a connection after authentication
///
/// Filled by the permissions callback, then shared read-only by every
/// session of the connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// Opaque extension values keyed by name
    pub extensions: HashMap<String, String>,
    /// Granted capability flags
    pub capabilities: BTreeSet<String>,
}

impl Permissions {
    /// Create an empty permission set
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a capability flag
    pub fn grant(&mut self, capability: impl Into<String>) {
        self.capabilities.insert(capability.into());
    }

    /// Whether a capability flag was granted
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Set an extension value, replacing any previous one
    pub fn set_extension(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.extensions.insert(name.into(), value.into());
    }

    /// Look up an extension value
    pub fn extension(&self, name: &str) -> Option<&str> {
        self.extensions.get(name).map(String::as_str)
    }
}
