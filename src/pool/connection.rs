//! Pooled connection wrapper

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Identifier for log correlation; never used for equality logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Hands out increasing connection ids, one sequence per factory
#[derive(Debug, Default)]
pub(crate) struct IdSequence {
    next: AtomicU64,
}

impl IdSequence {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// A live connection plus the bookkeeping the pool needs about it
pub struct ManagedConnection<C> {
    raw: C,
    id: ConnectionId,
    created_at: Instant,
}

impl<C> ManagedConnection<C> {
    pub(crate) fn new(raw: C, id: ConnectionId) -> Self {
        Self {
            raw,
            id,
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Older than `max_age`
    pub fn is_expired(&self, max_age: Duration) -> bool {
        self.age() > max_age
    }

    pub fn raw(&self) -> &C {
        &self.raw
    }

    pub fn raw_mut(&mut self) -> &mut C {
        &mut self.raw
    }

    pub fn into_raw(self) -> C {
        self.raw
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, by: Duration) {
        if let Some(earlier) = self.created_at.checked_sub(by) {
            self.created_at = earlier;
        }
    }
}

impl<C> fmt::Debug for ManagedConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("id", &self.id)
            .field("age", &self.age())
            .finish()
    }
}
