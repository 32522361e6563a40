//! Authentication gate for the server role.
//!
//! The reply value is forwarded to the client whether or not the token was
//! accepted; only acceptance flips the session's authenticated flag.

use std::collections::HashSet;

use async_trait::async_trait;
use muxline_core::wire::AUTH_SUCCESS;
use serde_json::Value;
use thiserror::Error;

/// Reply sent by [`StaticTokenAuthenticator`] on rejection.
pub const AUTH_UNAUTHORIZED: &str = "unauthorized";

/// A rejected token, carrying the reply still forwarded to the client.
#[derive(Clone, Debug, Error)]
#[error("authentication rejected: {reason}")]
pub struct AuthRejection {
    /// Why the token was refused (server-side only, for logs).
    pub reason: String,
    /// Value sent back under `authentication`.
    pub reply: Value,
}

impl AuthRejection {
    /// Build a rejection with a reason and reply.
    pub fn new(reason: impl Into<String>, reply: Value) -> Self {
        Self {
            reason: reason.into(),
            reply,
        }
    }
}

/// Validates a client token.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Accept (`Ok(reply)`) or reject (`Err(rejection)`) a token.
    async fn authenticate(&self, token: &str) -> Result<Value, AuthRejection>;
}

/// Accepts any token from a fixed set.
pub struct StaticTokenAuthenticator {
    tokens: HashSet<String>,
}

impl StaticTokenAuthenticator {
    /// Create from the accepted tokens.
    pub fn new(tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Value, AuthRejection> {
        if self.tokens.contains(token) {
            Ok(Value::String(AUTH_SUCCESS.into()))
        } else {
            Err(AuthRejection::new(
                "unknown token",
                Value::String(AUTH_UNAUTHORIZED.into()),
            ))
        }
    }
}

/// Adapts a synchronous closure into an [`Authenticator`].
pub struct FnAuthenticator<F>(pub F);

#[async_trait]
impl<F> Authenticator for FnAuthenticator<F>
where
    F: Fn(&str) -> Result<Value, AuthRejection> + Send + Sync,
{
    async fn authenticate(&self, token: &str) -> Result<Value, AuthRejection> {
        (self.0)(token)
    }
}
