//! Utility modules
//!
//! Retry with backoff and deadline helpers shared by the auth and pool code.

pub mod retry;
pub mod timeout;

pub use retry::{presets, retry_with_backoff, RetryConfig, RetryResult};
pub use timeout::{with_timeout, TimeoutError};
