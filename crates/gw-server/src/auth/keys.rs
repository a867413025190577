//! Authorized keys store
//!
//! Loads OpenSSH `authorized_keys` files and answers public key attempts by
//! comparing the offered key against every stored key in constant time.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use russh_keys::PublicKeyBase64;

use gw_core::traits::PublicKeyHandler;
use gw_core::{keys_equal, PublicKeyBytes};

/// Set of public keys allowed to log in, for any user
#[derive(Debug, Default, Clone)]
pub struct AuthorizedKeys {
    keys: Vec<AuthorizedKey>,
}

/// One trusted key
#[derive(Debug, Clone)]
pub struct AuthorizedKey {
    /// Raw key blob
    pub key: PublicKeyBytes,
    /// Key comment (if any)
    pub comment: Option<String>,
}

impl AuthorizedKeys {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load keys from several files, skipping missing ones
    pub fn load_from_files(paths: &[impl AsRef<Path>]) -> Result<Self> {
        let mut store = Self::new();

        for path in paths {
            let expanded = expand_home(path.as_ref());
            if expanded.exists() {
                store.load_from_file(&expanded)?;
            } else {
                tracing::warn!("Authorized keys file not found: {:?}", expanded);
            }
        }

        Ok(store)
    }

    /// Load keys from a single file
    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        tracing::info!("Loading authorized keys from {:?}", path);

        let file =
            std::fs::File::open(path).with_context(|| format!("Failed to open {:?}", path))?;

        let mut count = 0;
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line
                .with_context(|| format!("Failed to read line {} of {:?}", line_num + 1, path))?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match parse_openssh_line(line) {
                Some((key, comment)) => {
                    tracing::debug!(
                        "Loaded key: {} ({})",
                        key.fingerprint(),
                        comment.as_deref().unwrap_or("no comment")
                    );
                    self.keys.push(AuthorizedKey { key, comment });
                    count += 1;
                }
                None => {
                    tracing::warn!("Failed to parse key on line {} of {:?}", line_num + 1, path);
                }
            }
        }

        tracing::info!("Loaded {} authorized keys from {:?}", count, path);
        Ok(())
    }

    /// Trust a raw key blob
    pub fn add_key(&mut self, key: PublicKeyBytes, comment: Option<String>) {
        self.keys.push(AuthorizedKey { key, comment });
    }

    /// Whether `key` is one of the stored keys
    ///
    /// Every stored key is compared, matched or not.
    pub fn contains(&self, key: &PublicKeyBytes) -> bool {
        let mut found = false;
        for entry in &self.keys {
            found |= keys_equal(Some(&entry.key), Some(key));
        }
        found
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if there are no stored keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// List all stored keys
    pub fn list(&self) -> &[AuthorizedKey] {
        &self.keys
    }
}

#[async_trait]
impl PublicKeyHandler for AuthorizedKeys {
    async fn check_public_key(&self, _user: &str, key: &PublicKeyBytes) -> bool {
        self.contains(key)
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Parse `[options] type base64 [comment]`, or a bare base64 blob
fn parse_openssh_line(line: &str) -> Option<(PublicKeyBytes, Option<String>)> {
    let parts: Vec<&str> = line.split_whitespace().collect();

    // The blob is the first field that decodes; anything after it is comment
    for (i, part) in parts.iter().enumerate() {
        if let Ok(key) = russh_keys::parse_public_key_base64(part) {
            let comment = (i + 1 < parts.len()).then(|| parts[i + 1..].join(" "));
            return Some((PublicKeyBytes::from(key.public_key_bytes()), comment));
        }
    }
    None
}
