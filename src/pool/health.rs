//! Connection health checking
//!
//! Two independent checks, both of which must pass: the connection must not
//! be older than the configured maximum age, and (if enabled) a liveness
//! probe must succeed within its deadline. The age check runs first since it
//! needs no I/O.

use std::sync::Arc;
use std::time::Duration;

use super::connection::ManagedConnection;
use super::events::DiscardReason;
use crate::transport::Transport;
use crate::utils::timeout::{with_timeout, TimeoutError};

/// Outcome of a health check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy(DiscardReason),
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Health::Healthy)
    }
}

/// Validates idle connections before they are handed out
pub struct HealthChecker<T: Transport> {
    transport: Arc<T>,
    max_age: Option<Duration>,
    probe: bool,
    probe_timeout: Duration,
}

impl<T: Transport> HealthChecker<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            max_age: None,
            probe: true,
            probe_timeout: Duration::from_secs(2),
        }
    }

    /// Recycle connections older than `max_age`
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// Enable or disable the liveness probe
    pub fn with_probe(mut self, probe: bool) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Age check only
    pub fn check_age(&self, conn: &ManagedConnection<T::Connection>) -> Health {
        match self.max_age {
            Some(max_age) if conn.is_expired(max_age) => {
                Health::Unhealthy(DiscardReason::Expired { age: conn.age() })
            }
            _ => Health::Healthy,
        }
    }

    /// Full check: age, then liveness probe
    pub async fn check(&self, conn: &mut ManagedConnection<T::Connection>) -> Health {
        if let unhealthy @ Health::Unhealthy(_) = self.check_age(conn) {
            return unhealthy;
        }

        if !self.probe {
            return Health::Healthy;
        }

        match with_timeout(self.probe_timeout, self.transport.probe(conn.raw_mut())).await {
            Ok(()) => Health::Healthy,
            Err(TimeoutError::Timeout(d)) => Health::Unhealthy(DiscardReason::ProbeTimedOut(d)),
            Err(TimeoutError::Inner(e)) => Health::Unhealthy(DiscardReason::ProbeFailed(e)),
        }
    }

    pub async fn is_healthy(&self, conn: &mut ManagedConnection<T::Connection>) -> bool {
        self.check(conn).await.is_healthy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::test_support::{MockBehavior, MockTransport};

    async fn open(transport: &Arc<MockTransport>) -> ManagedConnection<<MockTransport as Transport>::Connection> {
        let raw = transport
            .open(&crate::transport::ConnectParams::new("mock"), "token")
            .await
            .unwrap();
        ManagedConnection::new(raw, crate::pool::connection::IdSequence::new().next())
    }

    #[tokio::test]
    async fn test_healthy_connection() {
        let transport = Arc::new(MockTransport::new());
        let checker = HealthChecker::new(transport.clone());
        let mut conn = open(&transport).await;

        assert_eq!(checker.check(&mut conn).await, Health::Healthy);
        assert_eq!(transport.probe_count(), 1);
    }

    #[tokio::test]
    async fn test_severed_connection_is_unhealthy() {
        let transport = Arc::new(MockTransport::new());
        let checker = HealthChecker::new(transport.clone());
        let mut conn = open(&transport).await;
        conn.raw().sever();

        assert_eq!(
            checker.check(&mut conn).await,
            Health::Unhealthy(DiscardReason::ProbeFailed(TransportError::Closed))
        );
    }

    #[tokio::test]
    async fn test_expired_connection_skips_probe() {
        let transport = Arc::new(MockTransport::new());
        let checker = HealthChecker::new(transport.clone())
            .with_max_age(Some(Duration::from_secs(60)));
        let mut conn = open(&transport).await;
        conn.backdate(Duration::from_secs(61));

        let health = checker.check(&mut conn).await;
        assert!(matches!(
            health,
            Health::Unhealthy(DiscardReason::Expired { .. })
        ));
        assert_eq!(transport.probe_count(), 0);
    }

    #[tokio::test]
    async fn test_probe_timeout() {
        let transport = Arc::new(MockTransport::new());
        let checker = HealthChecker::new(transport.clone())
            .with_probe_timeout(Duration::from_millis(20));
        let mut conn = open(&transport).await;
        transport.set_probe_behavior(MockBehavior::Hang);

        assert_eq!(
            checker.check(&mut conn).await,
            Health::Unhealthy(DiscardReason::ProbeTimedOut(Duration::from_millis(20)))
        );
    }

    #[tokio::test]
    async fn test_probe_disabled_only_checks_age() {
        let transport = Arc::new(MockTransport::new());
        let checker = HealthChecker::new(transport.clone()).with_probe(false);
        let mut conn = open(&transport).await;
        conn.raw().sever();

        assert!(checker.is_healthy(&mut conn).await);
        assert_eq!(transport.probe_count(), 0);
    }
}
