//! Pool configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::PoolError;

/// What `acquire` does when every connection is checked out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    /// Return `PoolError::Exhausted` immediately
    FailFast,
    /// Queue behind earlier waiters for up to the given duration
    Wait(Duration),
}

/// Configuration for pool sizing, exhaustion and recycling behavior
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Connections opened at startup (failures are logged, not fatal)
    pub min_connections: usize,
    /// Hard ceiling on physical connections
    pub max_connections: usize,
    /// Zero means fail fast when exhausted
    pub acquire_timeout: Duration,
    /// Zero disables age-based recycling
    pub max_connection_age: Duration,
    /// Run a liveness probe before handing out an idle connection
    pub probe_on_acquire: bool,
    /// Deadline for a single liveness probe
    pub probe_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 20,
            acquire_timeout: Duration::ZERO,
            max_connection_age: Duration::ZERO,
            probe_on_acquire: true,
            probe_timeout: Duration::from_secs(2),
        }
    }
}

impl PoolConfig {
    pub fn new(min_connections: usize, max_connections: usize) -> Self {
        Self {
            min_connections,
            max_connections,
            ..Default::default()
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_max_connection_age(mut self, age: Duration) -> Self {
        self.max_connection_age = age;
        self
    }

    pub fn with_probe_on_acquire(mut self, probe: bool) -> Self {
        self.probe_on_acquire = probe;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn exhaustion_policy(&self) -> ExhaustionPolicy {
        if self.acquire_timeout.is_zero() {
            ExhaustionPolicy::FailFast
        } else {
            ExhaustionPolicy::Wait(self.acquire_timeout)
        }
    }

    /// Age limit, if recycling is enabled
    pub fn max_age(&self) -> Option<Duration> {
        (!self.max_connection_age.is_zero()).then_some(self.max_connection_age)
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::InvalidConfig(
                "max_connections must be > 0".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PoolError::InvalidConfig(format!(
                "min_connections ({}) must not exceed max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.probe_on_acquire && self.probe_timeout.is_zero() {
            return Err(PoolError::InvalidConfig(
                "probe_timeout must be > 0 when probe_on_acquire is enabled".to_string(),
            ));
        }
        Ok(())
    }
}
