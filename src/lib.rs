//! Bounded connection pool for Aurora DSQL
//!
//! Every physical connection authenticates with a freshly minted IAM token,
//! idle connections are validated before reuse, and the pool never holds
//! more than its configured number of connections.

// Public modules
pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod pool;
pub mod transport;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use config::Settings;
pub use error::{AuthError, PoolError, TransportError};
pub use pool::{create_pool, PoolConfig, PoolManager, PooledConnection};
