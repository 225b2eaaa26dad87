//! Error types

mod types;

pub use types::{AuthError, PoolError, TransportError};
