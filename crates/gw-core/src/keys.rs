//! Constant-time public key comparison
//!
//! Authentication policies compare the key a client offered against the keys
//! they trust. A short-circuiting `==` would leak, through timing, how many
//! leading bytes of a trusted key an attacker has guessed. [`keys_equal`]
//! checks lengths first (lengths are public: they follow from the key type)
//! and then compares content with `subtle`, which touches every byte and
//! never branches on the data.

use subtle::ConstantTimeEq;

use crate::types::PublicKeyBytes;

/// Compare two optional keys in constant time.
///
/// Returns `false` if either side is absent, including when both are.
/// "No key" never matches anything.
pub fn keys_equal(a: Option<&PublicKeyBytes>, b: Option<&PublicKeyBytes>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.ct_eq(b),
        _ => false,
    }
}

/// Compare two secrets (passwords, tokens) in constant time.
///
/// Length is compared up front, so only the content stays hidden.
pub fn secrets_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

impl PublicKeyBytes {
    /// Constant-time equality against another key
    pub fn ct_eq(&self, other: &PublicKeyBytes) -> bool {
        secrets_equal(self.as_bytes(), other.as_bytes())
    }
}
