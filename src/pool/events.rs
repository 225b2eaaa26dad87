//! Pool diagnostics
//!
//! Lifecycle events are reported to a sink owned by the pool instance.
//! The default sink turns them into `tracing` events.

use std::fmt;
use std::time::Duration;

use super::connection::ConnectionId;
use crate::error::{PoolError, TransportError};

/// Why a connection left the pool for good
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// Older than `max_connection_age`
    Expired { age: Duration },
    /// Liveness probe returned an error
    ProbeFailed(TransportError),
    /// Liveness probe missed its deadline
    ProbeTimedOut(Duration),
    /// The caller's work failed or was abandoned
    Errored,
    /// Idle store already full
    Overflow,
    /// Pool is draining or closed
    Shutdown,
    /// The acquire was dropped while validating the connection
    Cancelled,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expired { age } => write!(f, "expired after {:?}", age),
            Self::ProbeFailed(e) => write!(f, "probe failed: {}", e),
            Self::ProbeTimedOut(d) => write!(f, "probe timed out after {:?}", d),
            Self::Errored => write!(f, "errored during use"),
            Self::Overflow => write!(f, "idle store full"),
            Self::Shutdown => write!(f, "pool shutting down"),
            Self::Cancelled => write!(f, "acquire cancelled during validation"),
        }
    }
}

/// Something that happened inside the pool
#[derive(Debug)]
pub enum PoolEvent<'a> {
    /// A new physical connection was opened
    Created { id: ConnectionId },
    /// A connection was handed to a caller
    CheckedOut { id: ConnectionId, reused: bool },
    /// A connection went back to the idle store
    CheckedIn { id: ConnectionId },
    /// A connection was closed and will not be reused
    Discarded {
        id: ConnectionId,
        reason: &'a DiscardReason,
    },
    /// `acquire` gave up because the pool was at capacity
    Exhausted { waited: Option<Duration> },
    /// Opening a connection during startup failed
    PrewarmFailed {
        attempt: usize,
        of: usize,
        error: &'a PoolError,
    },
    /// Shutdown finished
    ShutDown { closed_idle: usize },
}

/// Receives pool lifecycle events
pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, event: &PoolEvent<'_>);
}

/// Sink that logs every event through `tracing`
#[derive(Debug, Clone)]
pub struct TracingSink {
    cluster_id: String,
}

impl TracingSink {
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
        }
    }
}

impl DiagnosticsSink for TracingSink {
    fn record(&self, event: &PoolEvent<'_>) {
        let cluster_id = self.cluster_id.as_str();
        match event {
            PoolEvent::Created { id } => {
                tracing::info!(cluster_id, connection_id = %id, "Opened new connection")
            }
            PoolEvent::CheckedOut { id, reused } => tracing::debug!(
                cluster_id,
                connection_id = %id,
                reused,
                "Checked out connection"
            ),
            PoolEvent::CheckedIn { id } => {
                tracing::debug!(cluster_id, connection_id = %id, "Returned connection to pool")
            }
            PoolEvent::Discarded { id, reason } => match reason {
                DiscardReason::Overflow
                | DiscardReason::Shutdown
                | DiscardReason::Cancelled => tracing::debug!(
                    cluster_id,
                    connection_id = %id,
                    reason = %reason,
                    "Closed connection"
                ),
                _ => tracing::warn!(
                    cluster_id,
                    connection_id = %id,
                    reason = %reason,
                    "Discarded connection"
                ),
            },
            PoolEvent::Exhausted { waited } => tracing::warn!(
                cluster_id,
                waited_ms = waited.map(|d| d.as_millis() as u64),
                "Connection pool exhausted"
            ),
            PoolEvent::PrewarmFailed { attempt, of, error } => tracing::error!(
                cluster_id,
                attempt,
                of,
                error = %error,
                "Failed to open initial connection"
            ),
            PoolEvent::ShutDown { closed_idle } => {
                tracing::info!(cluster_id, closed_idle, "Connection pool shut down")
            }
        }
    }
}
