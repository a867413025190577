//! Authentication traits
//!
//! Each application callback is a one-method trait. An unset callback is an
//! explicit `None` at the call site, which is how the fail-closed default
//! stays visible. Plain closures implement the traits through blanket impls;
//! implement a trait on a struct when the check has to await something.

use async_trait::async_trait;
use std::fmt;

use crate::error::AuthError;
use crate::types::{Identity, Permissions, PublicKeyBytes};

/// Credential offered in one authentication attempt
#[derive(Clone)]
pub enum AuthMethod {
    /// The "none" method: no credential at all
    None,
    /// A public key whose possession the transport has verified
    PublicKey(PublicKeyBytes),
    /// A password
    Password(String),
}

impl AuthMethod {
    /// Method name as used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::PublicKey(_) => "publickey",
            AuthMethod::Password(_) => "password",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::None => write!(f, "None"),
            AuthMethod::PublicKey(key) => f.debug_tuple("PublicKey").field(key).finish(),
            AuthMethod::Password(_) => write!(f, "Password(<redacted>)"),
        }
    }
}

/// One authentication attempt as reported by the transport
#[derive(Debug, Clone)]
pub struct AuthAttempt {
    /// Requested user name
    pub user: String,
    /// Offered credential
    pub method: AuthMethod,
}

impl AuthAttempt {
    /// Attempt with no credential
    pub fn none(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            method: AuthMethod::None,
        }
    }

    /// Public key attempt
    pub fn public_key(user: impl Into<String>, key: PublicKeyBytes) -> Self {
        Self {
            user: user.into(),
            method: AuthMethod::PublicKey(key),
        }
    }

    /// Password attempt
    pub fn password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            method: AuthMethod::Password(password.into()),
        }
    }

    /// Identity this attempt establishes if it is accepted
    pub fn identity(&self) -> Identity {
        match &self.method {
            AuthMethod::PublicKey(key) => Identity::with_key(self.user.clone(), key.clone()),
            AuthMethod::None | AuthMethod::Password(_) => Identity::new(self.user.clone()),
        }
    }
}

/// Result of evaluating an attempt
///
/// Binary on purpose: the peer learns nothing beyond accept or deny.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Attempt accepted with these permissions
    Accept(Permissions),
    /// Attempt denied
    Deny,
}

impl AuthOutcome {
    /// Whether the attempt was accepted
    pub fn is_accept(&self) -> bool {
        matches!(self, AuthOutcome::Accept(_))
    }
}

/// Decides authentication attempts on behalf of a transport
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Evaluate one attempt
    async fn authenticate(&self, attempt: &AuthAttempt) -> AuthOutcome;
}

/// Public key authentication policy
#[async_trait]
pub trait PublicKeyHandler: Send + Sync {
    /// Whether `user` may log in with `key`
    async fn check_public_key(&self, user: &str, key: &PublicKeyBytes) -> bool;
}

#[async_trait]
impl<F> PublicKeyHandler for F
where
    F: Fn(&str, &PublicKeyBytes) -> bool + Send + Sync,
{
    async fn check_public_key(&self, user: &str, key: &PublicKeyBytes) -> bool {
        self(user, key)
    }
}

/// Password authentication policy
#[async_trait]
pub trait PasswordHandler: Send + Sync {
    /// Whether `user` may log in with `password`
    async fn check_password(&self, user: &str, password: &str) -> bool;
}

#[async_trait]
impl<F> PasswordHandler for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    async fn check_password(&self, user: &str, password: &str) -> bool {
        self(user, password)
    }
}

/// Hook run after a successful authentication to fill in permissions
///
/// Returning an error turns the accepted attempt into a denial.
#[async_trait]
pub trait PermissionsCallback: Send + Sync {
    /// Populate `permissions` for `user`
    async fn permissions(&self, user: &str, permissions: &mut Permissions)
        -> Result<(), AuthError>;
}

#[async_trait]
impl<F> PermissionsCallback for F
where
    F: Fn(&str, &mut Permissions) -> Result<(), AuthError> + Send + Sync,
{
    async fn permissions(
        &self,
        user: &str,
        permissions: &mut Permissions,
    ) -> Result<(), AuthError> {
        self(user, permissions)
    }
}

/// Policy deciding whether a session may allocate a PTY
#[async_trait]
pub trait PtyCallback: Send + Sync {
    /// Whether `user` holding `permissions` may allocate a PTY
    async fn allow_pty(&self, user: &str, permissions: &Permissions) -> bool;
}

#[async_trait]
impl<F> PtyCallback for F
where
    F: Fn(&str, &Permissions) -> bool + Send + Sync,
{
    async fn allow_pty(&self, user: &str, permissions: &Permissions) -> bool {
        self(user, permissions)
    }
}
