//! Authentication chain
//!
//! Routes each attempt to the handler for its method, then lets the
//! permissions callback veto or decorate the result. A method without a
//! configured handler is denied, and so is the "none" method.

use std::sync::Arc;

use async_trait::async_trait;

use gw_core::traits::{
    AuthAttempt, AuthMethod, AuthOutcome, Authenticator, PasswordHandler, PermissionsCallback,
    PublicKeyHandler,
};
use gw_core::Permissions;

/// Per-method authentication policy
///
/// Holds no per-attempt state, so one chain serves any number of concurrent
/// handshakes.
#[derive(Clone, Default)]
pub struct AuthChain {
    public_key: Option<Arc<dyn PublicKeyHandler>>,
    password: Option<Arc<dyn PasswordHandler>>,
    permissions: Option<Arc<dyn PermissionsCallback>>,
}

impl AuthChain {
    /// Chain that denies everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `handler` for public key attempts
    pub fn with_public_key(mut self, handler: Arc<dyn PublicKeyHandler>) -> Self {
        self.public_key = Some(handler);
        self
    }

    /// Use `handler` for password attempts
    pub fn with_password(mut self, handler: Arc<dyn PasswordHandler>) -> Self {
        self.password = Some(handler);
        self
    }

    /// Run `callback` after every accepted attempt
    pub fn with_permissions(mut self, callback: Arc<dyn PermissionsCallback>) -> Self {
        self.permissions = Some(callback);
        self
    }

    /// Whether public key attempts can succeed at all
    pub fn has_public_key(&self) -> bool {
        self.public_key.is_some()
    }

    /// Whether password attempts can succeed at all
    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// Evaluate one attempt
    pub async fn evaluate(&self, attempt: &AuthAttempt) -> AuthOutcome {
        let accepted = match (&attempt.method, &self.public_key, &self.password) {
            (AuthMethod::PublicKey(key), Some(handler), _) => {
                handler.check_public_key(&attempt.user, key).await
            }
            (AuthMethod::Password(password), _, Some(handler)) => {
                handler.check_password(&attempt.user, password).await
            }
            _ => false,
        };

        if !accepted {
            tracing::debug!(
                "Authentication denied for {} via {}",
                attempt.user,
                attempt.method.name()
            );
            return AuthOutcome::Deny;
        }

        let mut permissions = Permissions::new();
        if let Some(callback) = &self.permissions {
            if let Err(e) = callback.permissions(&attempt.user, &mut permissions).await {
                tracing::warn!("Permissions callback refused {}: {}", attempt.user, e);
                return AuthOutcome::Deny;
            }
        }

        tracing::debug!(
            "Authentication accepted for {} via {}",
            attempt.user,
            attempt.method.name()
        );
        AuthOutcome::Accept(permissions)
    }
}

#[async_trait]
impl Authenticator for AuthChain {
    async fn authenticate(&self, attempt: &AuthAttempt) -> AuthOutcome {
        self.evaluate(attempt).await
    }
}

impl std::fmt::Debug for AuthChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthChain")
            .field("public_key", &self.public_key.is_some())
            .field("password", &self.password.is_some())
            .field("permissions", &self.permissions.is_some())
            .finish()
    }
}
