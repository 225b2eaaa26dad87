//! Credential types and the token provider trait
//!
//! A `Credential` is a short-lived auth token used as the password for
//! exactly one connection attempt. Providers mint a new one on every call;
//! nothing in the crate caches them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

use crate::error::AuthError;

// ============================================================================
// Credential
// ============================================================================

/// A freshly minted auth token
///
/// The token is consumed by value when a connection is opened, so a
/// credential can never be used for two connection attempts.
pub struct Credential {
    /// Opaque token string
    token: String,
    /// When the token was minted
    minted_at: DateTime<Utc>,
    /// How long the token is valid for
    ttl: Duration,
}

impl Credential {
    /// Wrap a token minted just now
    pub fn new(token: impl Into<String>, ttl: Duration) -> Self {
        Self {
            token: token.into(),
            minted_at: Utc::now(),
            ttl,
        }
    }

    /// Consume the credential, yielding the token to hand to the transport
    pub fn into_token(self) -> String {
        self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("minted_at", &self.minted_at)
            .field("ttl", &self.ttl)
            .finish()
    }
}

// ============================================================================
// Token Provider Trait
// ============================================================================

/// Source of short-lived connection credentials
///
/// Implementations must be safe to call concurrently and must not retry
/// internally; retry policy belongs to the caller.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Mint a token for `cluster_id` valid for `ttl`
    async fn mint(&self, cluster_id: &str, ttl: Duration) -> Result<Credential, AuthError>;
}

/// A provider that hands out the same static secret
///
/// Useful against local Postgres instances that use password auth.
#[derive(Clone)]
pub struct StaticTokenProvider {
    secret: String,
}

impl StaticTokenProvider {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn mint(&self, cluster_id: &str, ttl: Duration) -> Result<Credential, AuthError> {
        if self.secret.is_empty() {
            return Err(AuthError::MissingCredentials {
                cluster_id: cluster_id.to_string(),
            });
        }
        Ok(Credential::new(self.secret.clone(), ttl))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_redacts_token() {
        let cred = Credential::new("super-secret-token", Duration::from_secs(5));
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("super-secret-token"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_into_token() {
        let cred = Credential::new("abc", Duration::from_secs(5));
        assert_eq!(cred.into_token(), "abc");
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticTokenProvider::new("pw");
        let cred = provider.mint("local", Duration::from_secs(5)).await.unwrap();
        assert_eq!(cred.into_token(), "pw");

        let empty = StaticTokenProvider::new("");
        let err = empty.mint("local", Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(
            err,
            AuthError::MissingCredentials {
                cluster_id: "local".to_string()
            }
        );
    }
}
