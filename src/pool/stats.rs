//! Pool status snapshot

use serde::Serialize;
use std::fmt;

/// Pool lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolPhase {
    /// Pre-warming initial connections
    Initializing,
    /// Serving acquisitions
    Ready,
    /// Shutdown started; idle connections are being closed
    Draining,
    /// No further connections will be created
    Closed,
}

impl PoolPhase {
    /// Whether `acquire` may still hand out connections
    pub fn accepts_acquire(&self) -> bool {
        matches!(self, PoolPhase::Initializing | PoolPhase::Ready)
    }
}

impl fmt::Display for PoolPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::Draining => write!(f, "draining"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Point-in-time view of the pool
///
/// Advisory only: concurrent acquires and releases may change the counts
/// right after the snapshot is taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Idle plus checked-out connections
    pub total: usize,
    /// Connections waiting in the idle store
    pub idle: usize,
    /// Connections lent to callers (including ones being opened for them)
    pub outstanding: usize,
    /// Configured ceiling
    pub max_connections: usize,
    /// Physical connections opened over the pool's lifetime
    pub total_created: u64,
    pub phase: PoolPhase,
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total: {}, idle: {}, in use: {}",
            self.total, self.idle, self.outstanding
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(idle: usize, outstanding: usize) -> PoolStatus {
        PoolStatus {
            total: idle + outstanding,
            idle,
            outstanding,
            max_connections: 5,
            total_created: (idle + outstanding) as u64,
            phase: PoolPhase::Ready,
        }
    }

    #[test]
    fn test_status_display() {
        assert_eq!(status(3, 2).to_string(), "total: 5, idle: 3, in use: 2");
    }

    #[test]
    fn test_status_serializes() {
        let json = serde_json::to_value(status(3, 0)).unwrap();
        assert_eq!(json["idle"], 3);
        assert_eq!(json["phase"], "ready");
    }

    #[test]
    fn test_phase_accepts_acquire() {
        assert!(PoolPhase::Ready.accepts_acquire());
        assert!(!PoolPhase::Draining.accepts_acquire());
        assert!(!PoolPhase::Closed.accepts_acquire());
    }
}
