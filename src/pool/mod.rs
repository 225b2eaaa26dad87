//! Connection pool
//!
//! A bounded pool of authenticated connections to one cluster. Every new
//! connection is opened with a freshly minted IAM token; idle connections
//! are age-checked and probed before reuse.

mod config;
mod connection;
mod engine;
mod events;
mod factory;
mod health;
mod manager;
mod stats;

use std::sync::Arc;

pub use self::config::{ExhaustionPolicy, PoolConfig};
pub use self::connection::{ConnectionId, ManagedConnection};
pub use self::engine::{PoolCore, PooledConnection};
pub use self::events::{DiagnosticsSink, DiscardReason, PoolEvent, TracingSink};
pub use self::factory::{ConnectionFactory, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TOKEN_TTL};
pub use self::health::{Health, HealthChecker};
pub use self::manager::{PoolBuilder, PoolManager};
pub use self::stats::{PoolPhase, PoolStatus};

use crate::config::{create_token_provider, Settings};
use crate::error::PoolError;
use crate::transport::PgTransport;

/// Build a pre-warmed PostgreSQL pool from application settings
pub async fn create_pool(settings: &Settings) -> Result<PoolManager<PgTransport>, PoolError> {
    let tokens = create_token_provider(settings).await;
    let transport = PgTransport::new().with_application_name(settings.app_name.clone());

    let factory = ConnectionFactory::new(
        settings.dsql.cluster_id.clone(),
        settings.connect_params(),
        Arc::new(transport),
        Arc::new(tokens),
    )
    .with_token_ttl(settings.token_ttl())
    .with_connect_timeout(settings.connect_timeout());

    PoolManager::builder(factory)
        .config(settings.pool_config())
        .build()
        .await
}
