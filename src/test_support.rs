//! In-memory doubles for pool tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::auth::{Credential, TokenProvider};
use crate::error::{AuthError, TransportError};
use crate::pool::{
    ConnectionFactory, DiagnosticsSink, DiscardReason, PoolConfig, PoolCore, PoolEvent,
};
use crate::transport::{ConnectParams, Transport};
use crate::utils::retry::presets;

/// Give spawned close tasks and queued waiters a chance to run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

pub fn service_error(cluster_id: &str) -> AuthError {
    AuthError::ServiceError {
        cluster_id: cluster_id.to_string(),
        code: "ThrottlingException".to_string(),
        message: "Rate exceeded".to_string(),
    }
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Debug, Clone)]
pub enum MockBehavior {
    Succeed,
    Fail(TransportError),
    /// Succeed after a pause
    Delay(Duration),
    Hang,
}

impl MockBehavior {
    async fn run(&self) -> Result<(), TransportError> {
        match self {
            MockBehavior::Succeed => Ok(()),
            MockBehavior::Fail(e) => Err(e.clone()),
            MockBehavior::Delay(pause) => {
                tokio::time::sleep(*pause).await;
                Ok(())
            }
            MockBehavior::Hang => std::future::pending().await,
        }
    }
}

#[derive(Debug)]
pub struct MockConnection {
    pub id: u64,
    severed: Arc<AtomicBool>,
}

impl MockConnection {
    /// Simulate the server dropping the session
    pub fn sever(&self) {
        self.severed.store(true, Ordering::SeqCst);
    }

    pub fn is_severed(&self) -> bool {
        self.severed.load(Ordering::SeqCst)
    }
}

pub struct MockTransport {
    opened: AtomicUsize,
    probes: AtomicUsize,
    closed: AtomicUsize,
    next_id: AtomicU64,
    open_behavior: Mutex<MockBehavior>,
    probe_behavior: Mutex<MockBehavior>,
    open_delay: Mutex<Option<Duration>>,
    passwords: Mutex<Vec<String>>,
    severed: Mutex<Vec<Arc<AtomicBool>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            opened: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            open_behavior: Mutex::new(MockBehavior::Succeed),
            probe_behavior: Mutex::new(MockBehavior::Succeed),
            open_delay: Mutex::new(None),
            passwords: Mutex::new(Vec::new()),
            severed: Mutex::new(Vec::new()),
        }
    }

    pub fn set_open_behavior(&self, behavior: MockBehavior) {
        *self.open_behavior.lock().unwrap() = behavior;
    }

    pub fn set_probe_behavior(&self, behavior: MockBehavior) {
        *self.probe_behavior.lock().unwrap() = behavior;
    }

    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock().unwrap() = Some(delay);
    }

    /// Open attempts, successful or not
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Successfully opened and not yet closed
    pub fn live_count(&self) -> usize {
        self.severed.lock().unwrap().len() - self.close_count()
    }

    pub fn passwords(&self) -> Vec<String> {
        self.passwords.lock().unwrap().clone()
    }

    /// Sever every connection opened so far
    pub fn sever_all(&self) {
        for flag in self.severed.lock().unwrap().iter() {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Connection = MockConnection;

    async fn open(
        &self,
        _params: &ConnectParams,
        password: &str,
    ) -> Result<MockConnection, TransportError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.passwords.lock().unwrap().push(password.to_string());

        let delay = *self.open_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let behavior = self.open_behavior.lock().unwrap().clone();
        behavior.run().await?;

        let severed = Arc::new(AtomicBool::new(false));
        self.severed.lock().unwrap().push(Arc::clone(&severed));
        Ok(MockConnection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            severed,
        })
    }

    async fn probe(&self, conn: &mut MockConnection) -> Result<(), TransportError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if conn.is_severed() {
            return Err(TransportError::Closed);
        }
        let behavior = self.probe_behavior.lock().unwrap().clone();
        behavior.run().await
    }

    async fn close(&self, _conn: MockConnection) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Token Provider
// ============================================================================

pub struct MockTokenProvider {
    minted: AtomicUsize,
    failures: Mutex<VecDeque<AuthError>>,
    last_ttl: Mutex<Option<Duration>>,
    delay: Mutex<Option<Duration>>,
}

impl MockTokenProvider {
    pub fn new() -> Self {
        Self {
            minted: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
            last_ttl: Mutex::new(None),
            delay: Mutex::new(None),
        }
    }

    pub fn set_mint_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Fail the next mint with `error`; queued failures are consumed in order
    pub fn push_failure(&self, error: AuthError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn mint_count(&self) -> usize {
        self.minted.load(Ordering::SeqCst)
    }

    pub fn last_ttl(&self) -> Option<Duration> {
        *self.last_ttl.lock().unwrap()
    }
}

#[async_trait]
impl TokenProvider for MockTokenProvider {
    async fn mint(&self, _cluster_id: &str, ttl: Duration) -> Result<Credential, AuthError> {
        let n = self.minted.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_ttl.lock().unwrap() = Some(ttl);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(Credential::new(format!("token-{}", n), ttl))
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Owned copy of a `PoolEvent`
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
    Created,
    CheckedOut { reused: bool },
    CheckedIn,
    Discarded(DiscardReason),
    Exhausted,
    PrewarmFailed,
    ShutDown,
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingSink {
    pub fn count(&self, predicate: impl Fn(&RecordedEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }
}

impl DiagnosticsSink for RecordingSink {
    fn record(&self, event: &PoolEvent<'_>) {
        let recorded = match event {
            PoolEvent::Created { .. } => RecordedEvent::Created,
            PoolEvent::CheckedOut { reused, .. } => RecordedEvent::CheckedOut { reused: *reused },
            PoolEvent::CheckedIn { .. } => RecordedEvent::CheckedIn,
            PoolEvent::Discarded { reason, .. } => RecordedEvent::Discarded((*reason).clone()),
            PoolEvent::Exhausted { .. } => RecordedEvent::Exhausted,
            PoolEvent::PrewarmFailed { .. } => RecordedEvent::PrewarmFailed,
            PoolEvent::ShutDown { .. } => RecordedEvent::ShutDown,
        };
        self.events.lock().unwrap().push(recorded);
    }
}

// ============================================================================
// Pool Fixtures
// ============================================================================

pub fn mock_factory(
    transport: &Arc<MockTransport>,
    tokens: &Arc<MockTokenProvider>,
) -> ConnectionFactory<MockTransport> {
    ConnectionFactory::new(
        "cluster-a",
        ConnectParams::new("cluster-a.dsql.us-east-1.on.aws"),
        Arc::clone(transport),
        Arc::clone(tokens) as Arc<dyn TokenProvider>,
    )
    .with_mint_retry(presets::token_mint().with_initial_delay(Duration::from_millis(1)))
}

pub type MockPool = (
    Arc<PoolCore<MockTransport>>,
    Arc<MockTransport>,
    Arc<MockTokenProvider>,
    Arc<RecordingSink>,
);

/// A pre-warmed pool over mocks
pub async fn mock_pool_core(config: PoolConfig) -> MockPool {
    mock_pool_core_with(config, |_, _| {}).await
}

/// Like `mock_pool_core`, with a hook to script the mocks before pre-warm
pub async fn mock_pool_core_with(
    config: PoolConfig,
    configure: impl FnOnce(&MockTransport, &MockTokenProvider),
) -> MockPool {
    let transport = Arc::new(MockTransport::new());
    let tokens = Arc::new(MockTokenProvider::new());
    let sink = Arc::new(RecordingSink::default());
    configure(&transport, &tokens);

    let core = Arc::new(PoolCore::new(
        config,
        mock_factory(&transport, &tokens),
        Arc::clone(&sink) as Arc<dyn DiagnosticsSink>,
    ));
    core.prewarm().await;
    (core, transport, tokens, sink)
}
