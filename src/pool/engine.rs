//! Pool engine
//!
//! Capacity is a fair `Semaphore` with `max_connections` permits: every
//! checked-out connection (and every connection being opened for a caller)
//! holds one permit, so waiters are served strictly in arrival order and the
//! pool can never lend out more than `max_connections` connections.
//!
//! Bookkeeping lives in a single `Mutex<PoolState>` that is never held across
//! an `.await`. Token minting, handshakes and liveness probes all run outside
//! of it; a caller first reserves its slot (`outstanding += 1`) under the
//! lock and then does the slow work unlocked. A new connection is only opened
//! while the idle store is empty, which keeps
//! `idle + outstanding <= max_connections`.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use super::config::{ExhaustionPolicy, PoolConfig};
use super::connection::{ConnectionId, ManagedConnection};
use super::events::{DiagnosticsSink, DiscardReason, PoolEvent};
use super::factory::ConnectionFactory;
use super::health::{Health, HealthChecker};
use super::stats::{PoolPhase, PoolStatus};
use crate::error::PoolError;
use crate::transport::Transport;
use crate::utils::timeout::{with_timeout, TimeoutError};

// ============================================================================
// Pool State
// ============================================================================

struct PoolState<C> {
    /// Idle connections; the most recently returned one is reused first
    idle: Vec<ManagedConnection<C>>,
    /// Connections lent out or being opened for a caller
    outstanding: usize,
    /// Only ever grows
    total_created: u64,
    phase: PoolPhase,
}

// ============================================================================
// Pool Core
// ============================================================================

/// Bounded store of idle connections with acquire/release semantics
pub struct PoolCore<T: Transport> {
    config: PoolConfig,
    factory: ConnectionFactory<T>,
    health: HealthChecker<T>,
    sink: Arc<dyn DiagnosticsSink>,
    capacity: Arc<Semaphore>,
    state: Mutex<PoolState<T::Connection>>,
}

impl<T: Transport> PoolCore<T> {
    pub fn new(
        config: PoolConfig,
        factory: ConnectionFactory<T>,
        sink: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        let health = HealthChecker::new(factory.transport().clone())
            .with_max_age(config.max_age())
            .with_probe(config.probe_on_acquire)
            .with_probe_timeout(config.probe_timeout);

        Self {
            capacity: Arc::new(Semaphore::new(config.max_connections)),
            state: Mutex::new(PoolState {
                idle: Vec::with_capacity(config.max_connections),
                outstanding: 0,
                total_created: 0,
                phase: PoolPhase::Initializing,
            }),
            config,
            factory,
            health,
            sink,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn cluster_id(&self) -> &str {
        self.factory.cluster_id()
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState<T::Connection>> {
        // State updates are plain counter and Vec operations; a panic elsewhere
        // cannot leave them half-applied.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_invariant(&self, state: &PoolState<T::Connection>) {
        debug_assert!(
            state.idle.len() + state.outstanding <= self.config.max_connections,
            "idle ({}) + outstanding ({}) exceeds max_connections ({})",
            state.idle.len(),
            state.outstanding,
            self.config.max_connections
        );
    }

    /// Open `min_connections` connections into the idle store
    ///
    /// Failures are reported to the sink and skipped; the pool simply starts
    /// smaller than requested.
    pub async fn prewarm(&self) {
        let target = self.config.min_connections;
        tracing::info!(
            cluster_id = %self.cluster_id(),
            min_connections = target,
            max_connections = self.config.max_connections,
            "Initializing connection pool"
        );

        for attempt in 1..=target {
            match self.factory.create().await {
                Ok(conn) => {
                    let id = conn.id();
                    let overflow = {
                        let mut state = self.lock_state();
                        if state.idle.len() + state.outstanding < self.config.max_connections {
                            state.total_created += 1;
                            state.idle.push(conn);
                            self.check_invariant(&state);
                            None
                        } else {
                            Some(conn)
                        }
                    };
                    match overflow {
                        None => self.sink.record(&PoolEvent::Created { id }),
                        Some(conn) => self.discard(conn, DiscardReason::Overflow).await,
                    }
                }
                Err(error) => self.sink.record(&PoolEvent::PrewarmFailed {
                    attempt,
                    of: target,
                    error: &error,
                }),
            }
        }

        let mut state = self.lock_state();
        if state.phase == PoolPhase::Initializing {
            state.phase = PoolPhase::Ready;
        }
    }

    // ------------------------------------------------------------------------
    // Acquire
    // ------------------------------------------------------------------------

    /// Check out a healthy connection
    ///
    /// Reuses the most recently returned idle connection after validating
    /// it. An unhealthy one is closed and replaced by exactly one new
    /// connection; a failure to open that replacement is surfaced.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection<T>, PoolError> {
        if !self.lock_state().phase.accepts_acquire() {
            return Err(self.closed_error("acquire"));
        }

        let permit = self.reserve_capacity().await?;

        let popped = {
            let mut state = self.lock_state();
            if !state.phase.accepts_acquire() {
                return Err(self.closed_error("acquire"));
            }
            state.outstanding += 1;
            let popped = state.idle.pop();
            self.check_invariant(&state);
            popped
        };
        let slot = SlotReservation {
            core: Arc::clone(self),
            permit: Some(permit),
        };

        let mut candidate = IdleCandidate {
            core: self,
            conn: popped,
        };
        if let Some((conn, health)) = candidate.validate().await {
            match health {
                Health::Healthy => {
                    // Shutdown may have started while the probe was running
                    let accepted = self.lock_state().phase.accepts_acquire();
                    if !accepted {
                        self.discard(conn, DiscardReason::Shutdown).await;
                        return Err(self.closed_error("acquire"));
                    }
                    self.sink.record(&PoolEvent::CheckedOut {
                        id: conn.id(),
                        reused: true,
                    });
                    return Ok(slot.into_checkout(conn));
                }
                Health::Unhealthy(reason) => {
                    self.discard(conn, reason).await;
                }
            }
        }

        // Idle store was empty, or its connection was just discarded
        let conn = self.factory.create().await?;
        let id = conn.id();

        let accepted = {
            let mut state = self.lock_state();
            state.total_created += 1;
            state.phase.accepts_acquire()
        };
        self.sink.record(&PoolEvent::Created { id });

        if !accepted {
            self.discard(conn, DiscardReason::Shutdown).await;
            return Err(self.closed_error("acquire"));
        }

        self.sink.record(&PoolEvent::CheckedOut { id, reused: false });
        Ok(slot.into_checkout(conn))
    }

    /// Take one unit of capacity according to the exhaustion policy
    async fn reserve_capacity(&self) -> Result<OwnedSemaphorePermit, PoolError> {
        match self.config.exhaustion_policy() {
            ExhaustionPolicy::FailFast => match Arc::clone(&self.capacity).try_acquire_owned() {
                Ok(permit) => Ok(permit),
                Err(TryAcquireError::NoPermits) => Err(self.exhausted_error(None)),
                Err(TryAcquireError::Closed) => Err(self.closed_error("acquire")),
            },
            ExhaustionPolicy::Wait(timeout) => {
                // Dropping this future (cancellation) leaves the wait queue untouched
                match with_timeout(timeout, Arc::clone(&self.capacity).acquire_owned()).await {
                    Ok(permit) => Ok(permit),
                    Err(TimeoutError::Inner(_)) => Err(self.closed_error("acquire")),
                    Err(TimeoutError::Timeout(waited)) => Err(self.exhausted_error(Some(waited))),
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Release
    // ------------------------------------------------------------------------

    /// Return a checked-out connection
    ///
    /// Errored connections, and any connection released while the pool is
    /// shutting down, are closed instead of being reused.
    fn release(&self, conn: ManagedConnection<T::Connection>, errored: bool) {
        let id = conn.id();
        let rejected = {
            let mut state = self.lock_state();
            state.outstanding = state.outstanding.saturating_sub(1);

            let rejected = if errored {
                Some((conn, DiscardReason::Errored))
            } else if !state.phase.accepts_acquire() {
                Some((conn, DiscardReason::Shutdown))
            } else if state.idle.len() >= self.config.max_connections {
                Some((conn, DiscardReason::Overflow))
            } else {
                state.idle.push(conn);
                None
            };
            self.check_invariant(&state);
            rejected
        };

        match rejected {
            None => self.sink.record(&PoolEvent::CheckedIn { id }),
            Some((conn, reason)) => self.discard_detached(conn, reason),
        }
    }

    /// Release a reserved slot that never produced a connection
    fn release_slot(&self) {
        let mut state = self.lock_state();
        state.outstanding = state.outstanding.saturating_sub(1);
    }

    async fn discard(&self, conn: ManagedConnection<T::Connection>, reason: DiscardReason) {
        self.sink.record(&PoolEvent::Discarded {
            id: conn.id(),
            reason: &reason,
        });
        self.factory.transport().close(conn.into_raw()).await;
    }

    /// Discard from synchronous context (guard drop)
    fn discard_detached(&self, conn: ManagedConnection<T::Connection>, reason: DiscardReason) {
        self.sink.record(&PoolEvent::Discarded {
            id: conn.id(),
            reason: &reason,
        });

        let raw = conn.into_raw();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let transport = Arc::clone(self.factory.transport());
                handle.spawn(async move {
                    transport.close(raw).await;
                });
            }
            // Without a runtime the handle is dropped, which closes the socket
            Err(_) => drop(raw),
        }
    }

    // ------------------------------------------------------------------------
    // Shutdown & Status
    // ------------------------------------------------------------------------

    /// Stop handing out connections and close every idle one
    ///
    /// Waiting acquirers fail with `PoolError::Closed`; connections still
    /// checked out are closed when they are released. Calling this again is
    /// a no-op.
    pub async fn shutdown(&self) {
        let drained = {
            let mut state = self.lock_state();
            if matches!(state.phase, PoolPhase::Draining | PoolPhase::Closed) {
                return;
            }
            state.phase = PoolPhase::Draining;
            std::mem::take(&mut state.idle)
        };

        tracing::info!(
            cluster_id = %self.cluster_id(),
            idle = drained.len(),
            "Shutting down connection pool"
        );
        self.capacity.close();

        let closed_idle = drained.len();
        for conn in drained {
            self.discard(conn, DiscardReason::Shutdown).await;
        }

        self.lock_state().phase = PoolPhase::Closed;
        self.sink.record(&PoolEvent::ShutDown { closed_idle });
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.lock_state();
        PoolStatus {
            total: state.idle.len() + state.outstanding,
            idle: state.idle.len(),
            outstanding: state.outstanding,
            max_connections: self.config.max_connections,
            total_created: state.total_created,
            phase: state.phase,
        }
    }

    pub fn is_closed(&self) -> bool {
        !self.lock_state().phase.accepts_acquire()
    }

    fn closed_error(&self, operation: &'static str) -> PoolError {
        PoolError::Closed {
            cluster_id: self.cluster_id().to_string(),
            operation,
        }
    }

    fn exhausted_error(&self, waited: Option<Duration>) -> PoolError {
        self.sink.record(&PoolEvent::Exhausted { waited });
        PoolError::Exhausted {
            cluster_id: self.cluster_id().to_string(),
            max_connections: self.config.max_connections,
            waited,
        }
    }
}

// ============================================================================
// Slot Reservation
// ============================================================================

/// A counted slot with no connection in it yet
///
/// Dropped without `into_checkout` (open failed, or the acquire future was
/// cancelled mid-probe or mid-handshake) it gives the slot and its permit
/// back.
struct SlotReservation<T: Transport> {
    core: Arc<PoolCore<T>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<T: Transport> SlotReservation<T> {
    fn into_checkout(mut self, conn: ManagedConnection<T::Connection>) -> PooledConnection<T> {
        PooledConnection {
            core: Arc::clone(&self.core),
            conn: Some(conn),
            permit: self.permit.take(),
            errored: false,
        }
    }
}

impl<T: Transport> Drop for SlotReservation<T> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.core.release_slot();
            drop(permit);
        }
    }
}

// ============================================================================
// Idle Candidate
// ============================================================================

/// An idle connection popped for reuse and not yet validated
///
/// If the acquire is cancelled mid-probe the connection is closed and
/// reported as `Cancelled`.
struct IdleCandidate<'a, T: Transport> {
    core: &'a PoolCore<T>,
    conn: Option<ManagedConnection<T::Connection>>,
}

impl<T: Transport> IdleCandidate<'_, T> {
    async fn validate(&mut self) -> Option<(ManagedConnection<T::Connection>, Health)> {
        let conn = self.conn.as_mut()?;
        let health = self.core.health.check(conn).await;
        self.conn.take().map(|conn| (conn, health))
    }
}

impl<T: Transport> Drop for IdleCandidate<'_, T> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.core.discard_detached(conn, DiscardReason::Cancelled);
        }
    }
}

// ============================================================================
// Pooled Connection
// ============================================================================

/// A connection checked out of the pool
///
/// Dropping it returns the connection to the pool, or closes it if it was
/// marked errored. The connection is back in the idle store before the
/// capacity it held is handed to the next waiter.
pub struct PooledConnection<T: Transport> {
    core: Arc<PoolCore<T>>,
    conn: Option<ManagedConnection<T::Connection>>,
    permit: Option<OwnedSemaphorePermit>,
    errored: bool,
}

impl<T: Transport> PooledConnection<T> {
    fn managed(&self) -> &ManagedConnection<T::Connection> {
        self.conn
            .as_ref()
            .expect("BUG: PooledConnection used after release")
    }

    pub fn id(&self) -> ConnectionId {
        self.managed().id()
    }

    pub fn age(&self) -> Duration {
        self.managed().age()
    }

    /// Close the connection on release instead of reusing it
    pub fn mark_errored(&mut self) {
        self.errored = true;
    }

    pub fn is_errored(&self) -> bool {
        self.errored
    }

    pub(crate) fn set_errored(&mut self, errored: bool) {
        self.errored = errored;
    }
}

impl<T: Transport> Deref for PooledConnection<T> {
    type Target = T::Connection;

    fn deref(&self) -> &Self::Target {
        self.managed().raw()
    }
}

impl<T: Transport> DerefMut for PooledConnection<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .expect("BUG: PooledConnection used after release")
            .raw_mut()
    }
}

impl<T: Transport> Drop for PooledConnection<T> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.core.release(conn, self.errored);
        }
        drop(self.permit.take());
    }
}

impl<T: Transport> std::fmt::Debug for PooledConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .field("errored", &self.errored)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
