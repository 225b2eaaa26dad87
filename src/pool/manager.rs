//! Public pool handle
//!
//! `PoolManager` is a cheap, cloneable handle around the shared pool engine.
//! Build one per cluster with `PoolManager::builder`, hand clones to worker
//! tasks, and call `shutdown` once on the way out.

use futures::future::BoxFuture;
use std::sync::Arc;

use super::config::PoolConfig;
use super::engine::{PoolCore, PooledConnection};
use super::events::{DiagnosticsSink, TracingSink};
use super::factory::ConnectionFactory;
use super::stats::PoolStatus;
use crate::error::PoolError;
use crate::transport::Transport;

/// Builder for `PoolManager`
pub struct PoolBuilder<T: Transport> {
    factory: ConnectionFactory<T>,
    config: PoolConfig,
    sink: Option<Arc<dyn DiagnosticsSink>>,
}

impl<T: Transport> PoolBuilder<T> {
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Route pool events somewhere other than `tracing`
    pub fn sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validate the configuration and pre-warm `min_connections`
    ///
    /// Pre-warm failures do not fail the build; they are reported to the
    /// sink and the pool starts with fewer idle connections.
    pub async fn build(self) -> Result<PoolManager<T>, PoolError> {
        self.config.validate()?;

        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(TracingSink::new(self.factory.cluster_id())));
        let core = Arc::new(PoolCore::new(self.config, self.factory, sink));
        core.prewarm().await;

        let status = core.status();
        tracing::info!(
            cluster_id = %core.cluster_id(),
            idle = status.idle,
            max_connections = status.max_connections,
            "Connection pool ready"
        );

        Ok(PoolManager { core })
    }
}

/// Connection pool for one cluster
pub struct PoolManager<T: Transport> {
    core: Arc<PoolCore<T>>,
}

impl<T: Transport> Clone for PoolManager<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Transport> PoolManager<T> {
    pub fn builder(factory: ConnectionFactory<T>) -> PoolBuilder<T> {
        PoolBuilder {
            factory,
            config: PoolConfig::default(),
            sink: None,
        }
    }

    pub fn cluster_id(&self) -> &str {
        self.core.cluster_id()
    }

    pub fn config(&self) -> &PoolConfig {
        self.core.config()
    }

    /// Check out a connection
    ///
    /// The guard returns the connection on drop. Call
    /// `PooledConnection::mark_errored` first if the session should not be
    /// reused.
    pub async fn acquire(&self) -> Result<PooledConnection<T>, PoolError> {
        self.core.acquire().await
    }

    /// Run `work` on a checked-out connection
    ///
    /// The connection goes back to the pool if `work` returns `Ok`. It is
    /// closed if `work` returns `Err`, panics, or the returned future is
    /// dropped before completing.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let now: String = pool
    ///     .with_connection(|conn| {
    ///         Box::pin(async move {
    ///             let row: (String,) = sqlx::query_as("SELECT CURRENT_TIMESTAMP::text")
    ///                 .fetch_one(conn)
    ///                 .await?;
    ///             Ok::<_, anyhow::Error>(row.0)
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn with_connection<F, R, E>(&self, work: F) -> Result<R, E>
    where
        F: for<'c> FnOnce(&'c mut T::Connection) -> BoxFuture<'c, Result<R, E>>,
        E: From<PoolError>,
    {
        let mut conn = self.acquire().await?;

        // Stays errored unless `work` finishes with Ok
        conn.set_errored(true);
        let result = work(&mut *conn).await;
        if result.is_ok() {
            conn.set_errored(false);
        }

        drop(conn);
        result
    }

    pub fn status(&self) -> PoolStatus {
        self.core.status()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Close idle connections and refuse further acquisitions
    pub async fn shutdown(&self) {
        self.core.shutdown().await;
    }
}
