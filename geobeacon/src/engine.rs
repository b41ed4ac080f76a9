//! Location acquisition engine.
//!
//! Owns the positioning provider's lifecycle and publishes fixes:
//!
//! - a `watch` cell holding the last known good fix
//! - a `broadcast` stream of fix events for the upload pipeline
//! - a `watch` cell with the engine state (for degraded-mode observers)
//!
//! The engine runs as a spawned task; callers hold a cloneable
//! [`EngineHandle`] and talk to it over a command channel, so no generics
//! leak into consumers and provider calls are serialized on one task.
//!
//! # Initialization and degraded mode
//!
//! Starting requires network reachability. While the probe reports
//! unreachable (or the provider fails to initialize) the engine sits in
//! [`EngineState::Degraded`] and retries on a fixed delay. Provider errors
//! are logged and absorbed; they never propagate to `start()`/`stop()`
//! callers.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::fix::LocationFix;
use crate::provider::{PositionProvider, Reachability};

/// Default delay before retrying a failed provider initialization.
pub const DEFAULT_INIT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Acquisition engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// Continuous acquisition not running.
    #[default]
    Stopped,
    /// Start requested, provider initializing.
    Initializing,
    /// Provider delivering fixes continuously.
    Running,
    /// Provider could not initialize; retrying on a fixed delay.
    Degraded,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Running => write!(f, "Running"),
            Self::Degraded => write!(f, "Degraded"),
        }
    }
}

/// Configuration for the acquisition engine.
#[derive(Debug, Clone)]
pub struct AcquisitionEngineConfig {
    /// Delay before retrying provider initialization.
    pub init_retry_delay: Duration,

    /// Capacity of the fix event broadcast channel.
    pub event_capacity: usize,
}

impl Default for AcquisitionEngineConfig {
    fn default() -> Self {
        Self {
            init_retry_delay: DEFAULT_INIT_RETRY_DELAY,
            event_capacity: 32,
        }
    }
}

enum EngineCommand {
    Start,
    Stop,
    ForceOnce,
}

/// Location acquisition engine entry point.
pub struct AcquisitionEngine;

impl AcquisitionEngine {
    /// Spawn the engine task and return a handle to it.
    ///
    /// `fix_rx` is the receiving end of the provider's fix channel.
    pub fn start<P, R>(
        provider: P,
        reachability: R,
        fix_rx: mpsc::Receiver<LocationFix>,
        config: AcquisitionEngineConfig,
    ) -> EngineHandle
    where
        P: PositionProvider + 'static,
        R: Reachability + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (latest_tx, latest_rx) = watch::channel(None);
        let (events_tx, _) = broadcast::channel(config.event_capacity);
        let (state_tx, state_rx) = watch::channel(EngineState::Stopped);
        let cancel = CancellationToken::new();

        let task = EngineTask {
            provider,
            reachability,
            fix_rx,
            cmd_rx,
            latest_tx,
            events_tx: events_tx.clone(),
            state_tx,
            cancel: cancel.child_token(),
            retry_delay: config.init_retry_delay,
            retry_at: None,
        };
        tokio::spawn(task.run());

        EngineHandle {
            cmd_tx,
            latest_rx,
            events_tx,
            state_rx,
            cancel,
        }
    }
}

/// Cloneable handle to a running acquisition engine.
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    latest_rx: watch::Receiver<Option<LocationFix>>,
    events_tx: broadcast::Sender<LocationFix>,
    state_rx: watch::Receiver<EngineState>,
    cancel: CancellationToken,
}

impl EngineHandle {
    /// Request continuous acquisition. Idempotent.
    pub async fn start(&self) {
        self.send(EngineCommand::Start).await;
    }

    /// Stop continuous acquisition. The provider handle is kept; a later
    /// `start()` resumes delivery. Idempotent.
    pub async fn stop(&self) {
        self.send(EngineCommand::Stop).await;
    }

    /// Request a single forced fix, used by the wake scheduler. Does not
    /// disturb continuous acquisition.
    pub async fn force_single_update(&self) {
        self.send(EngineCommand::ForceOnce).await;
    }

    /// The most recent successful fix, if any.
    pub fn current_fix(&self) -> Option<LocationFix> {
        self.latest_rx.borrow().clone()
    }

    /// Observe the last-known-good fix cell.
    pub fn observe_latest(&self) -> watch::Receiver<Option<LocationFix>> {
        self.latest_rx.clone()
    }

    /// Subscribe to the fix event stream.
    pub fn subscribe_fixes(&self) -> broadcast::Receiver<LocationFix> {
        self.events_tx.subscribe()
    }

    /// Current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Observe engine state transitions.
    pub fn observe_state(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Tear down the engine task. Pending commands are dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn send(&self, cmd: EngineCommand) {
        if self.cmd_tx.send(cmd).await.is_err() {
            tracing::debug!("Engine task gone, command dropped");
        }
    }
}

struct EngineTask<P, R> {
    provider: P,
    reachability: R,
    fix_rx: mpsc::Receiver<LocationFix>,
    cmd_rx: mpsc::Receiver<EngineCommand>,
    latest_tx: watch::Sender<Option<LocationFix>>,
    events_tx: broadcast::Sender<LocationFix>,
    state_tx: watch::Sender<EngineState>,
    cancel: CancellationToken,
    retry_delay: Duration,
    retry_at: Option<Instant>,
}

impl<P: PositionProvider, R: Reachability> EngineTask<P, R> {
    async fn run(mut self) {
        tracing::info!("Acquisition engine started");
        let mut fix_open = true;

        loop {
            let retry_at = self.retry_at;
            let retry_wait = async move {
                match retry_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,

                maybe_cmd = self.cmd_rx.recv() => match maybe_cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },

                maybe_fix = self.fix_rx.recv(), if fix_open => match maybe_fix {
                    Some(fix) => self.ingest(fix),
                    None => {
                        tracing::warn!("Provider fix channel closed");
                        fix_open = false;
                    }
                },

                _ = retry_wait => {
                    self.retry_at = None;
                    self.try_initialize().await;
                }
            }
        }

        tracing::info!("Acquisition engine stopped");
    }

    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Start => {
                if self.state() == EngineState::Running {
                    tracing::debug!("Engine already running, start ignored");
                    return;
                }
                self.set_state(EngineState::Initializing);
                self.try_initialize().await;
            }
            EngineCommand::Stop => {
                if let Err(e) = self.provider.stop().await {
                    tracing::warn!(error = %e, "Provider stop failed");
                }
                self.retry_at = None;
                self.set_state(EngineState::Stopped);
            }
            EngineCommand::ForceOnce => {
                if let Err(e) = self.provider.acquire_once().await {
                    tracing::warn!(error = %e, "Forced single acquisition failed");
                }
            }
        }
    }

    /// One initialization attempt: reachability probe, then continuous
    /// acquisition. On failure, arm the fixed-delay retry.
    async fn try_initialize(&mut self) {
        if !self.reachability.is_reachable().await {
            tracing::warn!(
                retry_secs = self.retry_delay.as_secs(),
                "Network unreachable, provider initialization deferred"
            );
            self.enter_degraded();
            return;
        }

        match self.provider.acquire_continuous().await {
            Ok(()) => {
                tracing::info!("Provider initialized, continuous acquisition active");
                self.set_state(EngineState::Running);
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    retry_secs = self.retry_delay.as_secs(),
                    "Provider initialization failed"
                );
                self.enter_degraded();
            }
        }
    }

    fn enter_degraded(&mut self) {
        self.set_state(EngineState::Degraded);
        self.retry_at = Some(Instant::now() + self.retry_delay);
    }

    fn ingest(&self, fix: LocationFix) {
        if fix.is_ok() {
            self.latest_tx.send_replace(Some(fix.clone()));
            // No subscribers is fine; the pipeline may not be up yet
            let _ = self.events_tx.send(fix);
        } else {
            tracing::warn!(
                code = fix.error_code,
                message = %fix.error_info,
                "Provider reported failed fix, keeping last known good"
            );
        }
    }

    fn state(&self) -> EngineState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: EngineState) {
        let previous = self.state();
        if previous != state {
            tracing::info!(from = %previous, to = %state, "Engine state changed");
            self.state_tx.send_replace(state);
        }
    }
}
