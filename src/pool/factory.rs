//! Connection factory
//!
//! Opens one authenticated physical connection per call: mint a fresh token,
//! then perform the TLS handshake with it as the password. A token minted
//! here is consumed by that single attempt and never kept.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::connection::{IdSequence, ManagedConnection};
use crate::auth::{Credential, TokenProvider};
use crate::error::{AuthError, PoolError, TransportError};
use crate::transport::{ConnectParams, Transport};
use crate::utils::retry::{presets, retry_with_backoff, RetryConfig};
use crate::utils::timeout::{with_timeout, TimeoutError};

/// Default token lifetime; the token only has to survive the handshake
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(5);

/// Default deadline for mint + handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Creates authenticated connections to one cluster
pub struct ConnectionFactory<T: Transport> {
    cluster_id: String,
    params: ConnectParams,
    transport: Arc<T>,
    tokens: Arc<dyn TokenProvider>,
    token_ttl: Duration,
    connect_timeout: Duration,
    mint_retry: RetryConfig,
    ids: IdSequence,
}

impl<T: Transport> ConnectionFactory<T> {
    pub fn new(
        cluster_id: impl Into<String>,
        params: ConnectParams,
        transport: Arc<T>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            params,
            transport,
            tokens,
            token_ttl: DEFAULT_TOKEN_TTL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            mint_retry: presets::token_mint(),
            ids: IdSequence::new(),
        }
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the retry policy for `ServiceError` mint failures
    pub fn with_mint_retry(mut self, retry: RetryConfig) -> Self {
        self.mint_retry = retry;
        self
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Mint a token and open a connection, bounded by the connect timeout
    ///
    /// Both phases share one deadline. Running out of time while minting is
    /// an auth failure; running out during the handshake is a connect
    /// failure.
    pub async fn create(&self) -> Result<ManagedConnection<T::Connection>, PoolError> {
        let deadline = Instant::now() + self.connect_timeout;

        let credential = match with_timeout(self.connect_timeout, self.mint()).await {
            Ok(credential) => credential,
            Err(TimeoutError::Inner(e)) => return Err(e.into()),
            Err(TimeoutError::Timeout(d)) => {
                tracing::warn!(
                    cluster_id = %self.cluster_id,
                    timeout_ms = d.as_millis() as u64,
                    "Timed out minting auth token"
                );
                return Err(AuthError::Unexpected {
                    cluster_id: self.cluster_id.clone(),
                    message: format!("token mint timed out after {:?}", d),
                }
                .into());
            }
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        let raw = match with_timeout(remaining, self.open(credential)).await {
            Ok(raw) => raw,
            Err(TimeoutError::Inner(cause)) => {
                tracing::error!(
                    cluster_id = %self.cluster_id,
                    endpoint = %self.params.endpoint(),
                    error = %cause,
                    "Connection handshake failed"
                );
                return Err(self.connect_error(cause));
            }
            Err(TimeoutError::Timeout(_)) => {
                tracing::warn!(
                    cluster_id = %self.cluster_id,
                    endpoint = %self.params.endpoint(),
                    timeout_ms = self.connect_timeout.as_millis() as u64,
                    "Timed out opening connection"
                );
                return Err(self.connect_error(TransportError::Timeout(self.connect_timeout)));
            }
        };

        let conn = ManagedConnection::new(raw, self.ids.next());
        tracing::debug!(
            cluster_id = %self.cluster_id,
            connection_id = %conn.id(),
            "Created new connection"
        );
        Ok(conn)
    }

    async fn open(&self, credential: Credential) -> Result<T::Connection, TransportError> {
        self.transport
            .open(&self.params, &credential.into_token())
            .await
    }

    async fn mint(&self) -> Result<Credential, AuthError> {
        let outcome = retry_with_backoff(&self.mint_retry, AuthError::is_retryable, || {
            self.tokens.mint(&self.cluster_id, self.token_ttl)
        })
        .await;

        if outcome.attempts > 1 {
            tracing::info!(
                cluster_id = %self.cluster_id,
                attempts = outcome.attempts,
                succeeded = outcome.result.is_ok(),
                "Retried token mint"
            );
        }

        outcome.result
    }

    fn connect_error(&self, cause: TransportError) -> PoolError {
        PoolError::Connect {
            cluster_id: self.cluster_id.clone(),
            endpoint: self.params.endpoint(),
            cause,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{service_error, MockBehavior, MockTokenProvider, MockTransport};

    fn factory(
        transport: &Arc<MockTransport>,
        tokens: &Arc<MockTokenProvider>,
    ) -> ConnectionFactory<MockTransport> {
        ConnectionFactory::new(
            "cluster-a",
            ConnectParams::new("cluster-a.dsql.us-east-1.on.aws"),
            transport.clone(),
            tokens.clone(),
        )
        .with_mint_retry(presets::token_mint().with_initial_delay(Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_create_uses_fresh_token_per_connection() {
        let transport = Arc::new(MockTransport::new());
        let tokens = Arc::new(MockTokenProvider::new());
        let factory = factory(&transport, &tokens);

        let a = factory.create().await.unwrap();
        let b = factory.create().await.unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(tokens.mint_count(), 2);
        let passwords = transport.passwords();
        assert_eq!(passwords.len(), 2);
        assert_ne!(passwords[0], passwords[1]);
        assert_eq!(tokens.last_ttl(), Some(DEFAULT_TOKEN_TTL));
    }

    #[tokio::test]
    async fn test_service_error_is_retried_once() {
        let transport = Arc::new(MockTransport::new());
        let tokens = Arc::new(MockTokenProvider::new());
        tokens.push_failure(service_error("cluster-a"));
        let factory = factory(&transport, &tokens);

        assert!(factory.create().await.is_ok());
        assert_eq!(tokens.mint_count(), 2);
    }

    #[tokio::test]
    async fn test_persistent_service_error_surfaces_auth_error() {
        let transport = Arc::new(MockTransport::new());
        let tokens = Arc::new(MockTokenProvider::new());
        tokens.push_failure(service_error("cluster-a"));
        tokens.push_failure(service_error("cluster-a"));
        tokens.push_failure(service_error("cluster-a"));
        let factory = factory(&transport, &tokens);

        let err = factory.create().await.unwrap_err();
        assert!(matches!(err, PoolError::Auth(AuthError::ServiceError { .. })));
        assert_eq!(tokens.mint_count(), 2);
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_credentials_not_retried() {
        let transport = Arc::new(MockTransport::new());
        let tokens = Arc::new(MockTokenProvider::new());
        tokens.push_failure(AuthError::MissingCredentials {
            cluster_id: "cluster-a".to_string(),
        });
        let factory = factory(&transport, &tokens);

        let err = factory.create().await.unwrap_err();
        assert!(matches!(
            err,
            PoolError::Auth(AuthError::MissingCredentials { .. })
        ));
        assert_eq!(tokens.mint_count(), 1);
    }

    #[tokio::test]
    async fn test_handshake_failure_is_connect_error() {
        let transport = Arc::new(MockTransport::new());
        transport.set_open_behavior(MockBehavior::Fail(TransportError::Handshake(
            "password authentication failed".to_string(),
        )));
        let tokens = Arc::new(MockTokenProvider::new());
        let factory = factory(&transport, &tokens);

        match factory.create().await.unwrap_err() {
            PoolError::Connect {
                cluster_id,
                endpoint,
                cause,
            } => {
                assert_eq!(cluster_id, "cluster-a");
                assert_eq!(endpoint, "cluster-a.dsql.us-east-1.on.aws:5432");
                assert!(matches!(cause, TransportError::Handshake(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // No internal retry of the handshake
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test]
    async fn test_create_respects_connect_timeout() {
        let transport = Arc::new(MockTransport::new());
        transport.set_open_behavior(MockBehavior::Hang);
        let tokens = Arc::new(MockTokenProvider::new());
        let factory = factory(&transport, &tokens).with_connect_timeout(Duration::from_millis(20));

        let err = factory.create().await.unwrap_err();
        assert!(matches!(
            err,
            PoolError::Connect {
                cause: TransportError::Timeout(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_stalled_mint_is_auth_error() {
        let transport = Arc::new(MockTransport::new());
        let tokens = Arc::new(MockTokenProvider::new());
        tokens.set_mint_delay(Duration::from_millis(200));
        let factory = factory(&transport, &tokens).with_connect_timeout(Duration::from_millis(20));

        let err = factory.create().await.unwrap_err();
        match err {
            PoolError::Auth(AuthError::Unexpected { cluster_id, message }) => {
                assert_eq!(cluster_id, "cluster-a");
                assert!(message.contains("timed out"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test]
    async fn test_handshake_gets_what_is_left_of_the_deadline() {
        let transport = Arc::new(MockTransport::new());
        transport.set_open_delay(Duration::from_millis(30));
        let tokens = Arc::new(MockTokenProvider::new());
        tokens.set_mint_delay(Duration::from_millis(30));
        let factory = factory(&transport, &tokens).with_connect_timeout(Duration::from_millis(45));

        // Each phase fits on its own, both together do not
        let err = factory.create().await.unwrap_err();
        assert!(matches!(
            err,
            PoolError::Connect {
                cause: TransportError::Timeout(d),
                ..
            } if d == Duration::from_millis(45)
        ));
        assert_eq!(transport.open_count(), 1);
    }
}
