//! Connection authentication.
//!
//! The WebSocket endpoint authenticates before the protocol upgrade:
//! the `token` query parameter is resolved to a user and tenant, and a
//! bad token is rejected with plain HTTP 401 so no socket is ever
//! registered for it.

use async_trait::async_trait;
use banter_core::{TenantId, UserId};
use thiserror::Error;

/// Identity resolved from a connection token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// The authenticated user.
    pub user_id: UserId,
    /// The tenant the user belongs to.
    pub tenant_id: TenantId,
}

/// Why a token could not be resolved.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token is malformed, unknown, or expired.
    #[error("invalid token")]
    InvalidToken,
    /// The backing identity service failed.
    #[error("auth backend failure: {message}")]
    Backend {
        /// Human-readable failure description.
        message: String,
    },
}

/// Resolves connection tokens to identities.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve `token` to an [`AuthContext`], or reject it.
    async fn resolve(&self, token: &str) -> Result<AuthContext, AuthError>;
}

/// Development authenticator: any non-empty token maps to one fixed
/// identity. Stands in until a real identity service is wired up.
#[derive(Debug, Clone)]
pub struct StaticAuthenticator {
    user_id: UserId,
    tenant_id: TenantId,
}

impl StaticAuthenticator {
    /// Create an authenticator that resolves every non-empty token to
    /// the given identity.
    pub fn new(user_id: impl Into<UserId>, tenant_id: impl Into<TenantId>) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
        }
    }
}

impl Default for StaticAuthenticator {
    fn default() -> Self {
        Self::new("user_123", "tenant_default")
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn resolve(&self, token: &str) -> Result<AuthContext, AuthError> {
        if token.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(AuthContext {
            user_id: self.user_id.clone(),
            tenant_id: self.tenant_id.clone(),
        })
    }
}
