//! Server configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use gw_protocol::Window;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;

/// Largest window dimension accepted by default, in cells
pub const DEFAULT_MAX_WINDOW_DIMENSION: u32 = 16_384;

/// Configuration for the session server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the SSH server to
    pub bind_address: String,

    /// Path to the host key file
    pub host_key_path: PathBuf,

    /// OpenSSH `authorized_keys` files consulted by public key auth
    pub authorized_keys: Vec<PathBuf>,

    /// How long a connection may take to authenticate
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,

    /// How long session handlers get to finish once their connection closes
    #[serde(with = "duration_secs")]
    pub shutdown_grace: Duration,

    /// Minimum time before a failed authentication is answered
    #[serde(with = "duration_secs")]
    pub auth_rejection_time: Duration,

    /// Upper bound on PTY window dimensions
    pub window_limits: WindowLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let config_dir = super::default_config_dir();

        Self {
            bind_address: "0.0.0.0:2222".to_string(),
            host_key_path: config_dir.join("host_key"),
            authorized_keys: Vec::new(),
            handshake_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
            auth_rejection_time: Duration::from_secs(1),
            window_limits: WindowLimits::default(),
        }
    }
}

impl ServerConfig {
    /// Check the configuration for values the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.trim().is_empty() {
            return Err(ConfigError::MissingField("bind_address".to_string()));
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "handshake_timeout must be greater than zero".to_string(),
            ));
        }
        self.window_limits.validate()
    }
}

/// Upper bound on PTY window dimensions
///
/// Clients choose their window size freely; bounding it keeps an absurd
/// value from reaching code that allocates per cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLimits {
    /// Maximum columns
    pub max_width: u32,
    /// Maximum rows
    pub max_height: u32,
}

impl WindowLimits {
    /// Create new limits
    pub fn new(max_width: u32, max_height: u32) -> Self {
        Self {
            max_width,
            max_height,
        }
    }

    /// Limits that accept any window
    pub fn unbounded() -> Self {
        Self::new(u32::MAX, u32::MAX)
    }

    /// Whether `window` fits within the limits
    pub fn allows(&self, window: Window) -> bool {
        window.width <= self.max_width && window.height <= self.max_height
    }

    /// Reject limits that would refuse every real terminal
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_width == 0 || self.max_height == 0 {
            return Err(ConfigError::Invalid(
                "window limits must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for WindowLimits {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WINDOW_DIMENSION, DEFAULT_MAX_WINDOW_DIMENSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_address, "0.0.0.0:2222");
        assert!(config.host_key_path.ends_with("host_key"));
    }

    #[test]
    fn test_empty_bind_address_rejected() {
        let config = ServerConfig {
            bind_address: "  ".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField(field)) if field == "bind_address"
        ));
    }

    #[test]
    fn test_zero_handshake_timeout_rejected() {
        let config = ServerConfig {
            handshake_timeout: Duration::ZERO,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_window_limits_allow_zero_window() {
        let limits = WindowLimits::default();
        assert!(limits.allows(Window::new(0, 0)));
        assert!(limits.allows(Window::new(80, 24)));
        assert!(limits.allows(Window::new(16_384, 16_384)));
        assert!(!limits.allows(Window::new(16_385, 24)));
        assert!(!limits.allows(Window::new(80, u32::MAX)));
        assert!(WindowLimits::unbounded().allows(Window::new(u32::MAX, u32::MAX)));
    }

    #[test]
    fn test_zero_window_limits_rejected() {
        assert!(WindowLimits::new(0, 10).validate().is_err());
        assert!(WindowLimits::new(10, 10).validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            bind_address = "127.0.0.1:2200"
            shutdown_grace = 2

            [window_limits]
            max_width = 500
            max_height = 200
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:2200");
        assert_eq!(config.shutdown_grace, Duration::from_secs(2));
        assert_eq!(config.handshake_timeout, Duration::from_secs(30));
        assert_eq!(config.window_limits, WindowLimits::new(500, 200));
        assert!(config.authorized_keys.is_empty());
    }
}
