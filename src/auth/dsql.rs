//! Aurora DSQL token provider
//!
//! Signs IAM auth tokens locally with the credentials resolved by the AWS
//! SDK default chain. The `admin` role gets a `DbConnectAdmin` token, every
//! other role a plain `DbConnect` token.

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sdk_dsql::auth_token::{AuthTokenGenerator, Config as AuthTokenConfig};
use std::error::Error as StdError;
use std::time::Duration;

use super::credential::{Credential, TokenProvider};
use crate::error::AuthError;

/// Database role that requires an admin token
pub const ADMIN_USER: &str = "admin";

/// Token provider backed by the DSQL auth token generator
#[derive(Debug, Clone)]
pub struct DsqlTokenProvider {
    /// Shared AWS SDK configuration (region + credentials chain)
    sdk_config: SdkConfig,
    /// Cluster endpoint the token is scoped to
    hostname: String,
    /// Whether to sign for the admin role
    admin: bool,
}

impl DsqlTokenProvider {
    /// Create a provider signing admin tokens for `hostname`
    pub fn new(sdk_config: SdkConfig, hostname: impl Into<String>) -> Self {
        Self {
            sdk_config,
            hostname: hostname.into(),
            admin: true,
        }
    }

    /// Pick the token flavour for the database role
    pub fn for_user(mut self, username: &str) -> Self {
        self.admin = username == ADMIN_USER;
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn is_admin(&self) -> bool {
        self.admin
    }

    /// Resolve the credentials chain once and pin the result for signing
    ///
    /// Resolving here lets failures be classified; handing the resolved
    /// credentials to the generator keeps it from walking the chain again.
    async fn signing_config(&self, cluster_id: &str) -> Result<SdkConfig, AuthError> {
        let Some(provider) = self.sdk_config.credentials_provider() else {
            return Err(AuthError::MissingCredentials {
                cluster_id: cluster_id.to_string(),
            });
        };

        let credentials = provider
            .provide_credentials()
            .await
            .map_err(|e| classify_credentials_error(cluster_id, &e))?;

        Ok(self
            .sdk_config
            .to_builder()
            .credentials_provider(SharedCredentialsProvider::new(credentials))
            .build())
    }
}

#[async_trait]
impl TokenProvider for DsqlTokenProvider {
    async fn mint(&self, cluster_id: &str, ttl: Duration) -> Result<Credential, AuthError> {
        let signing = self.signing_config(cluster_id).await?;

        let config = AuthTokenConfig::builder()
            .hostname(self.hostname.clone())
            .expires_in(ttl.as_secs().max(1))
            .build()
            .map_err(|e| AuthError::Unexpected {
                cluster_id: cluster_id.to_string(),
                message: format!("invalid token generator config: {}", e),
            })?;
        let generator = AuthTokenGenerator::new(config);

        let signed = if self.admin {
            generator.db_connect_admin_auth_token(&signing).await
        } else {
            generator.db_connect_auth_token(&signing).await
        };

        let token = signed
            .map_err(|e| classify_sign_error(cluster_id, e.as_ref()))?
            .to_string();

        if token.is_empty() {
            tracing::error!(cluster_id = %cluster_id, "Token generator returned an empty token");
            return Err(AuthError::Unexpected {
                cluster_id: cluster_id.to_string(),
                message: "token generator returned an empty token".to_string(),
            });
        }

        tracing::debug!(
            cluster_id = %cluster_id,
            admin = self.admin,
            ttl_secs = ttl.as_secs(),
            "Minted DSQL auth token"
        );

        Ok(Credential::new(token, ttl))
    }
}

// ============================================================================
// Error Classification
// ============================================================================

/// Map a credentials chain failure onto the auth error taxonomy
fn classify_credentials_error(cluster_id: &str, err: &CredentialsError) -> AuthError {
    let cluster_id = cluster_id.to_string();
    let message = error_chain(err);
    let service_error = |code: &str| AuthError::ServiceError {
        cluster_id: cluster_id.clone(),
        code: code.to_string(),
        message: message.clone(),
    };

    let classified = match err {
        CredentialsError::CredentialsNotLoaded(_) => AuthError::MissingCredentials {
            cluster_id: cluster_id.clone(),
        },
        CredentialsError::ProviderTimedOut(_) => service_error("ProviderTimedOut"),
        CredentialsError::InvalidConfiguration(_) => service_error("InvalidConfiguration"),
        CredentialsError::ProviderError(_) => service_error("ProviderError"),
        _ => AuthError::Unexpected {
            cluster_id: cluster_id.clone(),
            message: message.clone(),
        },
    };

    match &classified {
        AuthError::MissingCredentials { .. } => {
            tracing::error!(cluster_id = %cluster_id, "AWS credentials are not configured")
        }
        AuthError::ServiceError { code, .. } => tracing::error!(
            cluster_id = %cluster_id,
            code = %code,
            error = %message,
            "AWS credentials provider error"
        ),
        AuthError::Unexpected { .. } => tracing::error!(
            cluster_id = %cluster_id,
            error = %message,
            "Unexpected error resolving AWS credentials"
        ),
    }

    classified
}

/// Map a signing failure; credential errors may surface here too
fn classify_sign_error(cluster_id: &str, err: &(dyn StdError + Send + Sync + 'static)) -> AuthError {
    if let Some(cred_err) = err.downcast_ref::<CredentialsError>() {
        return classify_credentials_error(cluster_id, cred_err);
    }

    let message = error_chain(err);
    tracing::error!(cluster_id = %cluster_id, error = %message, "Failed to sign DSQL auth token");
    AuthError::Unexpected {
        cluster_id: cluster_id.to_string(),
        message,
    }
}

/// Flatten an error and its sources into one line
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

// ============================================================================
// Tests
// ============================================================================
