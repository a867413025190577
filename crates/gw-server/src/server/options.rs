//! Server options
//!
//! Options are applied in order when the server is configured. Each one
//! validates its input; the first failure aborts startup before anything
//! is bound.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use gw_core::config::{ServerConfig, WindowLimits};
use gw_core::error::ConfigError;
use gw_core::traits::{PasswordHandler, PermissionsCallback, PtyCallback, PublicKeyHandler};

use crate::auth::AuthChain;
use crate::session::Handler;

/// Resolved settings of a server
#[derive(Clone)]
pub struct ServerSettings {
    /// Address for `listen_and_serve`
    pub address: Option<String>,
    /// Session handler; `None` falls back to the default handler
    pub handler: Option<Arc<dyn Handler>>,
    /// Public key policy
    pub public_key: Option<Arc<dyn PublicKeyHandler>>,
    /// Password policy
    pub password: Option<Arc<dyn PasswordHandler>>,
    /// Post-authentication permissions hook
    pub permissions: Option<Arc<dyn PermissionsCallback>>,
    /// PTY policy; `None` denies every PTY request
    pub pty: Option<Arc<dyn PtyCallback>>,
    /// Upper bound on PTY windows
    pub window_limits: WindowLimits,
    /// Time allowed for the handshake, authentication included
    pub handshake_timeout: Duration,
    /// Time handlers get to return once their connection is closing
    pub shutdown_grace: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let config = ServerConfig::default();
        Self {
            address: None,
            handler: None,
            public_key: None,
            password: None,
            permissions: None,
            pty: None,
            window_limits: config.window_limits,
            handshake_timeout: config.handshake_timeout,
            shutdown_grace: config.shutdown_grace,
        }
    }
}

impl ServerSettings {
    /// Authentication chain built from the configured policies
    pub fn auth_chain(&self) -> AuthChain {
        let mut chain = AuthChain::new();
        if let Some(handler) = &self.public_key {
            chain = chain.with_public_key(Arc::clone(handler));
        }
        if let Some(handler) = &self.password {
            chain = chain.with_password(Arc::clone(handler));
        }
        if let Some(callback) = &self.permissions {
            chain = chain.with_permissions(Arc::clone(callback));
        }
        chain
    }
}

impl fmt::Debug for ServerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSettings")
            .field("address", &self.address)
            .field("handler", &self.handler.is_some())
            .field("public_key", &self.public_key.is_some())
            .field("password", &self.password.is_some())
            .field("permissions", &self.permissions.is_some())
            .field("pty", &self.pty.is_some())
            .field("window_limits", &self.window_limits)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("shutdown_grace", &self.shutdown_grace)
            .finish()
    }
}

type Apply = Box<dyn FnOnce(&mut ServerSettings) -> Result<(), ConfigError> + Send>;

/// A configuration step applied to [`ServerSettings`]
pub struct ServerOption(Apply);

impl ServerOption {
    /// Option from an arbitrary settings mutation
    pub fn new<F>(apply: F) -> Self
    where
        F: FnOnce(&mut ServerSettings) -> Result<(), ConfigError> + Send + 'static,
    {
        Self(Box::new(apply))
    }

    /// Apply to `settings`
    pub fn apply(self, settings: &mut ServerSettings) -> Result<(), ConfigError> {
        (self.0)(settings)
    }
}

impl fmt::Debug for ServerOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServerOption")
    }
}

/// Listen address
pub fn address(addr: impl Into<String>) -> ServerOption {
    let addr = addr.into();
    ServerOption::new(move |settings| {
        if addr.trim().is_empty() {
            return Err(ConfigError::InvalidOption(
                "address must not be empty".to_string(),
            ));
        }
        settings.address = Some(addr);
        Ok(())
    })
}

/// Session handler
pub fn handler(handler: impl Handler) -> ServerOption {
    let handler: Arc<dyn Handler> = Arc::new(handler);
    ServerOption::new(move |settings| {
        settings.handler = Some(handler);
        Ok(())
    })
}

/// Enable public key authentication
pub fn public_key_auth(handler: impl PublicKeyHandler + 'static) -> ServerOption {
    let handler: Arc<dyn PublicKeyHandler> = Arc::new(handler);
    ServerOption::new(move |settings| {
        settings.public_key = Some(handler);
        Ok(())
    })
}

/// Enable password authentication
pub fn password_auth(handler: impl PasswordHandler + 'static) -> ServerOption {
    let handler: Arc<dyn PasswordHandler> = Arc::new(handler);
    ServerOption::new(move |settings| {
        settings.password = Some(handler);
        Ok(())
    })
}

/// Hook filling in permissions after authentication
pub fn permissions_callback(callback: impl PermissionsCallback + 'static) -> ServerOption {
    let callback: Arc<dyn PermissionsCallback> = Arc::new(callback);
    ServerOption::new(move |settings| {
        settings.permissions = Some(callback);
        Ok(())
    })
}

/// PTY policy
pub fn pty_callback(callback: impl PtyCallback + 'static) -> ServerOption {
    let callback: Arc<dyn PtyCallback> = Arc::new(callback);
    ServerOption::new(move |settings| {
        settings.pty = Some(callback);
        Ok(())
    })
}

/// Upper bound on PTY windows
pub fn window_limits(limits: WindowLimits) -> ServerOption {
    ServerOption::new(move |settings| {
        limits.validate()?;
        settings.window_limits = limits;
        Ok(())
    })
}

/// Handshake deadline
pub fn handshake_timeout(timeout: Duration) -> ServerOption {
    ServerOption::new(move |settings| {
        if timeout.is_zero() {
            return Err(ConfigError::InvalidOption(
                "handshake timeout must be greater than zero".to_string(),
            ));
        }
        settings.handshake_timeout = timeout;
        Ok(())
    })
}

/// Grace period for handlers at connection close
pub fn shutdown_grace(grace: Duration) -> ServerOption {
    ServerOption::new(move |settings| {
        settings.shutdown_grace = grace;
        Ok(())
    })
}

/// Take address, limits and timeouts from a loaded configuration
pub fn from_config(config: &ServerConfig) -> ServerOption {
    let config = config.clone();
    ServerOption::new(move |settings| {
        config.validate()?;
        settings.address = Some(config.bind_address);
        settings.window_limits = config.window_limits;
        settings.handshake_timeout = config.handshake_timeout;
        settings.shutdown_grace = config.shutdown_grace;
        Ok(())
    })
}
