//! Supervised observer connection.
//!
//! UI processes observe the worker over a host-specific connection
//! mechanism (sockets, platform IPC). That mechanism drops connections;
//! this module supervises it: a reconnecting client that exposes
//! connected/disconnected as an observable state and retries failed
//! connections with exponential backoff (2^n seconds, capped at 5
//! minutes). Connection failures are surfaced on an error stream and are
//! never fatal - the worker keeps operating in degraded mode.
//!
//! The transport itself lives behind [`LinkEndpoint`]; the core depends
//! only on its connect/close contract.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

/// Maximum reconnect backoff (5 minutes).
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Errors surfaced by a supervised link.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    /// The endpoint refused or failed the connection attempt.
    #[error("link connect failed: {0}")]
    ConnectFailed(String),
}

/// Connection state, observable through the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// A session is established.
    Connected,
    /// No session; connecting or backing off.
    #[default]
    Disconnected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// An established session with the remote observer.
pub trait LinkSession: Send {
    /// Resolves when the session drops, however that happens.
    fn closed(&mut self) -> impl Future<Output = ()> + Send;
}

/// Host-specific connection mechanism behind the supervised link.
pub trait LinkEndpoint: Send + Sync {
    type Session: LinkSession;

    /// Attempt to establish a session.
    fn connect(&self) -> impl Future<Output = Result<Self::Session, LinkError>> + Send;
}

/// Configuration for the supervised link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// First-retry backoff; doubles per consecutive failure.
    pub backoff_base: Duration,

    /// Backoff ceiling.
    pub backoff_cap: Duration,

    /// Capacity of the error broadcast channel.
    pub error_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(1),
            backoff_cap: MAX_BACKOFF,
            error_capacity: 16,
        }
    }
}

/// Supervised link entry point.
pub struct SupervisedLink;

impl SupervisedLink {
    /// Bind the link: spawn the supervision task and start connecting.
    pub fn bind<E>(endpoint: E, config: LinkConfig) -> LinkHandle
    where
        E: LinkEndpoint + 'static,
    {
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);
        let (error_tx, _) = broadcast::channel(config.error_capacity);
        let cancel = CancellationToken::new();

        let task = LinkTask {
            endpoint,
            state_tx,
            error_tx: error_tx.clone(),
            cancel: cancel.child_token(),
            backoff_base: config.backoff_base,
            backoff_cap: config.backoff_cap,
        };
        tokio::spawn(task.run());

        LinkHandle {
            state_rx,
            error_tx,
            cancel,
        }
    }
}

/// Handle to a supervised link.
#[derive(Clone)]
pub struct LinkHandle {
    state_rx: watch::Receiver<LinkState>,
    error_tx: broadcast::Sender<LinkError>,
    cancel: CancellationToken,
}

impl LinkHandle {
    /// Current connection state.
    pub fn state(&self) -> LinkState {
        *self.state_rx.borrow()
    }

    /// Observe connection state transitions.
    pub fn observe_state(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }

    /// Subscribe to connection errors.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<LinkError> {
        self.error_tx.subscribe()
    }

    /// Unbind: stop supervising and drop any session.
    pub fn unbind(&self) {
        self.cancel.cancel();
    }
}

struct LinkTask<E> {
    endpoint: E,
    state_tx: watch::Sender<LinkState>,
    error_tx: broadcast::Sender<LinkError>,
    cancel: CancellationToken,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl<E: LinkEndpoint> LinkTask<E> {
    async fn run(self) {
        tracing::info!("Supervised link started");
        let mut consecutive_errors: u32 = 0;

        loop {
            if consecutive_errors > 0 {
                let backoff =
                    calculate_backoff(consecutive_errors, self.backoff_base, self.backoff_cap);
                tracing::debug!(
                    backoff_secs = backoff.as_secs(),
                    consecutive_errors,
                    "Backing off before reconnect"
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }

            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.endpoint.connect() => result,
            };

            match attempt {
                Ok(mut session) => {
                    consecutive_errors = 0;
                    self.set_state(LinkState::Connected);

                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = session.closed() => {
                            tracing::info!("Link session closed, reconnecting");
                            self.set_state(LinkState::Disconnected);
                        }
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::warn!(error = %e, consecutive_errors, "Link connect failed");
                    self.set_state(LinkState::Disconnected);
                    // No subscribers is fine; errors are advisory
                    let _ = self.error_tx.send(e);
                }
            }
        }

        self.set_state(LinkState::Disconnected);
        tracing::info!("Supervised link stopped");
    }

    fn set_state(&self, state: LinkState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

/// Exponential backoff: base * 2^(n-1), capped.
fn calculate_backoff(consecutive_errors: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(consecutive_errors.saturating_sub(1).min(20));
    base.saturating_mul(factor).min(cap)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_calculate_backoff() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(300);
        assert_eq!(calculate_backoff(1, base, cap), Duration::from_secs(1));
        assert_eq!(calculate_backoff(2, base, cap), Duration::from_secs(2));
        assert_eq!(calculate_backoff(3, base, cap), Duration::from_secs(4));
        assert_eq!(calculate_backoff(4, base, cap), Duration::from_secs(8));
        assert_eq!(calculate_backoff(12, base, cap), cap); // 2048 > 300
    }

    /// Session that closes when told to.
    struct TestSession {
        closed_rx: tokio::sync::oneshot::Receiver<()>,
    }

    impl LinkSession for TestSession {
        async fn closed(&mut self) {
            let _ = (&mut self.closed_rx).await;
        }
    }

    /// Endpoint that fails a set number of times before connecting.
    struct FlakyEndpoint {
        failures_left: Arc<AtomicUsize>,
        attempts: Arc<AtomicUsize>,
        close_tx: Arc<std::sync::Mutex<Option<tokio::sync::oneshot::Sender<()>>>>,
    }

    impl LinkEndpoint for FlakyEndpoint {
        type Session = TestSession;

        async fn connect(&self) -> Result<TestSession, LinkError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(LinkError::ConnectFailed("refused".into()));
            }
            let (tx, rx) = tokio::sync::oneshot::channel();
            *self.close_tx.lock().unwrap() = Some(tx);
            Ok(TestSession { closed_rx: rx })
        }
    }

    fn flaky(failures: usize) -> (FlakyEndpoint, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        (
            FlakyEndpoint {
                failures_left: Arc::new(AtomicUsize::new(failures)),
                attempts: attempts.clone(),
                close_tx: Arc::new(std::sync::Mutex::new(None)),
            },
            attempts,
        )
    }

    fn fast_config() -> LinkConfig {
        LinkConfig {
            backoff_base: Duration::from_millis(10),
            backoff_cap: Duration::from_millis(100),
            error_capacity: 16,
        }
    }

    async fn wait_for_state(handle: &LinkHandle, expected: LinkState) {
        let mut rx = handle.observe_state();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if *rx.borrow_and_update() == expected {
                    return;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap_or_else(|_| panic!("Timed out waiting for {:?}", expected));
    }

    #[tokio::test]
    async fn test_connects_after_failures() {
        let (endpoint, attempts) = flaky(2);
        let handle = SupervisedLink::bind(endpoint, fast_config());

        let mut errors = handle.subscribe_errors();
        wait_for_state(&handle, LinkState::Connected).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(errors.try_recv().is_ok());

        handle.unbind();
    }

    #[tokio::test]
    async fn test_immediate_connect() {
        let (endpoint, attempts) = flaky(0);
        let handle = SupervisedLink::bind(endpoint, fast_config());

        wait_for_state(&handle, LinkState::Connected).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        handle.unbind();
    }

    #[tokio::test]
    async fn test_unbind_stops_reconnecting() {
        let (endpoint, attempts) = flaky(usize::MAX);
        let handle = SupervisedLink::bind(endpoint, fast_config());

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.unbind();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let after_unbind = attempts.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), after_unbind);
        assert_eq!(handle.state(), LinkState::Disconnected);
    }
}
