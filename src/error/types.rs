//! Pool error types
//!
//! Every error surfaced to a caller names the cluster it concerns and the
//! operation that was attempted, so it can be diagnosed without looking at
//! pool internals.

use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Token Errors
// ============================================================================

/// Errors returned when minting an auth token
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No underlying AWS identity is available to sign with
    #[error("No AWS credentials available to mint a token for cluster {cluster_id}")]
    MissingCredentials { cluster_id: String },

    /// The identity service rejected the request
    #[error("Identity service rejected token request for cluster {cluster_id}: {code} - {message}")]
    ServiceError {
        cluster_id: String,
        code: String,
        message: String,
    },

    /// Anything else
    #[error("Unexpected error minting token for cluster {cluster_id}: {message}")]
    Unexpected { cluster_id: String, message: String },
}

impl AuthError {
    /// Only service rejections are worth a second attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::ServiceError { .. })
    }

    /// Cluster the failed request was for
    pub fn cluster_id(&self) -> &str {
        match self {
            AuthError::MissingCredentials { cluster_id }
            | AuthError::ServiceError { cluster_id, .. }
            | AuthError::Unexpected { cluster_id, .. } => cluster_id,
        }
    }
}

// ============================================================================
// Transport Errors
// ============================================================================

/// Errors reported by the wire-level transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection was already closed by either side
    #[error("connection is closed")]
    Closed,

    /// TLS or authentication handshake was refused
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Socket level failure
    #[error("I/O error: {0}")]
    Io(String),

    /// The operation did not finish within its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Anything the driver reports that does not fit above
    #[error("{0}")]
    Other(String),
}

// ============================================================================
// Pool Errors
// ============================================================================

/// Errors surfaced by the pool to its callers
#[derive(Error, Debug)]
pub enum PoolError {
    /// Token mint failed while opening a new connection
    #[error("Failed to authenticate new connection: {0}")]
    Auth(#[from] AuthError),

    /// Handshake failed after a valid token was obtained
    #[error("Failed to connect to cluster {cluster_id} at {endpoint}: {cause}")]
    Connect {
        cluster_id: String,
        endpoint: String,
        cause: TransportError,
    },

    /// At capacity (fail-fast policy) or the wait timed out
    #[error("Connection pool for cluster {cluster_id} exhausted: all {max_connections} connections in use{}", waited_suffix(.waited))]
    Exhausted {
        cluster_id: String,
        max_connections: usize,
        waited: Option<Duration>,
    },

    /// The pool has been shut down
    #[error("Connection pool for cluster {cluster_id} is closed (attempted {operation})")]
    Closed {
        cluster_id: String,
        operation: &'static str,
    },

    /// The pool configuration is unusable
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
}

fn waited_suffix(waited: &Option<Duration>) -> String {
    match waited {
        Some(d) => format!(" (waited {:?})", d),
        None => String::new(),
    }
}

impl PoolError {
    /// Whether the failure came from minting or opening a connection
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, PoolError::Auth(_) | PoolError::Connect { .. })
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, PoolError::Exhausted { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, PoolError::Closed { .. })
    }
}
