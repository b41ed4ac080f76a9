//! The background worker - one owned value composing all components.
//!
//! [`Worker::start`] wires the configuration store, acquisition engine,
//! wake scheduler and upload pipeline together and returns a
//! [`WorkerHandle`]. There are no ambient globals: the host constructs the
//! worker once and passes the handle to whoever needs to observe or
//! control it.
//!
//! # Control flow
//!
//! - Configuration changes flow live from the store into the scheduler
//!   (wake period) and pipeline (intervals, URL, enabled flag).
//! - The engine's fix stream feeds the pipeline.
//! - Wake-cycle fires force one acquisition, then one delivery attempt.
//! - Foreground mode transitions force an immediate delivery attempt.
//!
//! Stopping cancels the wake timer and stops acquisition, then tears the
//! tasks down. In-flight network calls complete or time out naturally;
//! "stopped" means "accepting no new work", not "all async work ceased".

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigStore, IntervalKind, Settings, WAKE_INTERVAL_MAX_MS, WAKE_INTERVAL_MIN_MS};
use crate::engine::{AcquisitionEngine, AcquisitionEngineConfig, EngineHandle, EngineState};
use crate::fix::{DeliveryStatus, LocationFix, WorkerLifecycleState};
use crate::provider::{AlwaysReachable, PositionProvider, Reachability};
use crate::scheduler::{
    ScheduleError, WakeCycleHandler, WakeScheduler, WakeSchedulerConfig, WakeSchedulerHandle,
    WakeToken, DEFAULT_MAX_TOKEN_HOLD, DEFAULT_SETTLE_DELAY,
};
use crate::uploader::{ForegroundModeTracker, UploadPipeline, UploadPipelineHandle, UploadTransport};

/// Errors raised while assembling the worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The wake scheduler rejected its initial period.
    #[error("wake scheduler rejected period: {0}")]
    Schedule(#[from] ScheduleError),
}

/// Tuning knobs for the assembled worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Acquisition engine tuning.
    pub engine: AcquisitionEngineConfig,

    /// Delay between a wake cycle's forced acquisition and forced upload.
    pub settle_delay: Duration,

    /// Maximum wake-token hold per cycle.
    pub max_token_hold: Duration,

    /// Accepted wake-period range in milliseconds. Hosts keep the default;
    /// tests shrink it to run on short timers.
    pub wake_period_bounds: (i64, i64),
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            engine: AcquisitionEngineConfig::default(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            max_token_hold: DEFAULT_MAX_TOKEN_HOLD,
            wake_period_bounds: (WAKE_INTERVAL_MIN_MS, WAKE_INTERVAL_MAX_MS),
        }
    }
}

/// Worker entry point.
pub struct Worker;

impl Worker {
    /// Start a worker with default tuning and no reachability probe.
    pub fn start<P, T, W>(
        settings: Settings,
        provider: P,
        fix_rx: mpsc::Receiver<LocationFix>,
        transport: T,
        wake_token: W,
    ) -> Result<WorkerHandle, WorkerError>
    where
        P: PositionProvider + 'static,
        T: UploadTransport + 'static,
        W: WakeToken + 'static,
    {
        Self::start_with(
            settings,
            provider,
            fix_rx,
            AlwaysReachable,
            transport,
            wake_token,
            WorkerConfig::default(),
        )
    }

    /// Start a worker with explicit reachability probe and tuning.
    pub fn start_with<P, R, T, W>(
        settings: Settings,
        provider: P,
        fix_rx: mpsc::Receiver<LocationFix>,
        reachability: R,
        transport: T,
        wake_token: W,
        config: WorkerConfig,
    ) -> Result<WorkerHandle, WorkerError>
    where
        P: PositionProvider + 'static,
        R: Reachability + 'static,
        T: UploadTransport + 'static,
        W: WakeToken + 'static,
    {
        // The store must never expose an out-of-bounds wake interval, so
        // the snapshot is clamped before anything observes it
        let mut settings = settings;
        settings.wake_interval_ms =
            clamp_wake_period(settings.wake_interval_ms, config.wake_period_bounds);
        let wake_period = Duration::from_millis(settings.wake_interval_ms as u64);
        let store = ConfigStore::new(settings);
        let tracker = ForegroundModeTracker::default();

        let engine = AcquisitionEngine::start(provider, reachability, fix_rx, config.engine);

        let pipeline = UploadPipeline::start(
            transport,
            store.observe(),
            tracker.observe(),
            engine.subscribe_fixes(),
            engine.observe_latest(),
        );

        let scheduler = WakeScheduler::start(
            wake_token,
            WorkerWakeHandler {
                engine: engine.clone(),
                pipeline: pipeline.clone(),
            },
            WakeSchedulerConfig {
                period: wake_period,
                settle_delay: config.settle_delay,
                max_token_hold: config.max_token_hold,
                period_bounds: config.wake_period_bounds,
            },
        )?;

        let (lifecycle_tx, lifecycle_rx) = watch::channel(WorkerLifecycleState::Stopped);
        let lifecycle_tx = Arc::new(lifecycle_tx);
        let cancel = CancellationToken::new();

        set_lifecycle(&lifecycle_tx, WorkerLifecycleState::Initializing);

        tokio::spawn(run_startup(engine.clone(), scheduler.clone()));
        tokio::spawn(map_engine_state(
            engine.observe_state(),
            lifecycle_tx.clone(),
            cancel.child_token(),
        ));
        tokio::spawn(watch_config(
            store.observe(),
            scheduler.clone(),
            cancel.child_token(),
        ));

        Ok(WorkerHandle {
            store,
            engine,
            scheduler,
            pipeline,
            tracker,
            lifecycle_tx,
            lifecycle_rx,
            cancel,
        })
    }
}

/// Kick off the engine and arm the wake timer.
async fn run_startup(engine: EngineHandle, scheduler: WakeSchedulerHandle) {
    engine.start().await;
    scheduler.start().await;
}

/// Map engine state transitions onto the worker lifecycle.
async fn map_engine_state(
    mut engine_state: watch::Receiver<EngineState>,
    lifecycle_tx: Arc<watch::Sender<WorkerLifecycleState>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = engine_state.changed() => {
                if result.is_err() {
                    break;
                }
                let mapped = match *engine_state.borrow_and_update() {
                    EngineState::Running => Some(WorkerLifecycleState::Running),
                    EngineState::Degraded => Some(WorkerLifecycleState::Degraded),
                    EngineState::Initializing => Some(WorkerLifecycleState::Initializing),
                    // Worker-level stop drives its own transitions
                    EngineState::Stopped => None,
                };
                if let Some(state) = mapped {
                    set_lifecycle(&lifecycle_tx, state);
                }
            }
        }
    }
}

/// Push live wake-period changes from the store into the scheduler.
async fn watch_config(
    mut config_rx: watch::Receiver<Settings>,
    scheduler: WakeSchedulerHandle,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = config_rx.changed() => {
                if result.is_err() {
                    break;
                }
                let wake_ms = config_rx.borrow_and_update().wake_interval_ms;
                // The store already validated; a rejection here means the
                // scheduler bounds were narrowed below the store's
                if let Err(e) = scheduler.set_period(wake_ms) {
                    tracing::warn!(error = %e, "Scheduler rejected stored wake period");
                }
            }
        }
    }
}

fn clamp_wake_period(ms: i64, bounds: (i64, i64)) -> i64 {
    let clamped = ms.clamp(bounds.0, bounds.1);
    if clamped != ms {
        tracing::warn!(ms, clamped, "Initial wake interval clamped to bounds");
    }
    clamped
}

fn set_lifecycle(tx: &watch::Sender<WorkerLifecycleState>, next: WorkerLifecycleState) {
    tx.send_if_modified(|current| {
        if *current == next || !current.can_transition_to(next) {
            false
        } else {
            tracing::info!(from = %current, to = %next, "Worker lifecycle changed");
            *current = next;
            true
        }
    });
}

/// Implements a wake cycle in terms of the engine and pipeline.
struct WorkerWakeHandler {
    engine: EngineHandle,
    pipeline: UploadPipelineHandle,
}

impl WakeCycleHandler for WorkerWakeHandler {
    async fn force_acquisition(&self) {
        self.engine.force_single_update().await;
    }

    async fn force_upload(&self) {
        self.pipeline.notify_wake_cycle().await;
    }
}

/// Handle to a running worker.
///
/// Cloneable; all clones control the same worker.
#[derive(Clone)]
pub struct WorkerHandle {
    store: ConfigStore,
    engine: EngineHandle,
    scheduler: WakeSchedulerHandle,
    pipeline: UploadPipelineHandle,
    tracker: ForegroundModeTracker,
    lifecycle_tx: Arc<watch::Sender<WorkerLifecycleState>>,
    lifecycle_rx: watch::Receiver<WorkerLifecycleState>,
    cancel: CancellationToken,
}

impl WorkerHandle {
    /// Subscribe to the fix event stream.
    pub fn observe_fix(&self) -> broadcast::Receiver<LocationFix> {
        self.engine.subscribe_fixes()
    }

    /// The most recent successful fix, if any.
    pub fn current_fix(&self) -> Option<LocationFix> {
        self.engine.current_fix()
    }

    /// Observe delivery-status changes.
    pub fn observe_delivery_status(&self) -> watch::Receiver<DeliveryStatus> {
        self.pipeline.observe_status()
    }

    /// Current delivery status.
    pub fn delivery_status(&self) -> DeliveryStatus {
        self.pipeline.status()
    }

    /// Observe worker lifecycle transitions.
    pub fn observe_lifecycle(&self) -> watch::Receiver<WorkerLifecycleState> {
        self.lifecycle_rx.clone()
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> WorkerLifecycleState {
        *self.lifecycle_rx.borrow()
    }

    /// Set foreground mode. An actual transition forces one immediate
    /// delivery attempt; repeated sets of the same value do nothing.
    /// Returns `true` on transition.
    pub fn set_foreground_mode(&self, foreground: bool) -> bool {
        self.tracker.set_foreground(foreground)
    }

    /// Send the last-known fix immediately, bypassing the throttle.
    pub async fn upload_latest(&self) {
        self.pipeline.upload_latest().await;
    }

    /// Flip the master upload switch.
    pub fn set_upload_enabled(&self, enabled: bool) {
        self.store.set_upload_enabled(enabled);
    }

    /// Replace the collector URL. Empty disables uploads.
    pub fn set_server_url(&self, url: impl Into<String>) {
        self.store.set_server_url(url);
    }

    /// Replace the user identifier.
    pub fn set_user_name(&self, name: impl Into<String>) {
        self.store.set_user_name(name);
    }

    /// Set an interval. Returns `false` (previous value kept) on
    /// validation failure; wake-period changes re-register a running
    /// timer live.
    pub fn set_interval(&self, kind: IntervalKind, ms: i64) -> bool {
        self.store.set_interval(kind, ms)
    }

    /// The live configuration store.
    pub fn config(&self) -> &ConfigStore {
        &self.store
    }

    /// Stop the worker: cancel the wake timer, stop acquisition, tear the
    /// tasks down. In-flight sends complete or time out on their own.
    pub async fn stop(&self) {
        set_lifecycle(&self.lifecycle_tx, WorkerLifecycleState::Stopping);

        self.scheduler.stop().await;
        self.engine.stop().await;

        // Let the engine tear the provider down before cancelling its task
        let mut engine_state = self.engine.observe_state();
        let _ = tokio::time::timeout(Duration::from_secs(5), async {
            while *engine_state.borrow_and_update() != EngineState::Stopped {
                if engine_state.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;

        self.cancel.cancel();
        self.scheduler.shutdown();
        self.pipeline.shutdown();
        self.engine.shutdown();

        set_lifecycle(&self.lifecycle_tx, WorkerLifecycleState::Stopped);
        tracing::info!("Worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::provider::ChannelProvider;
    use crate::scheduler::CountingWakeToken;
    use crate::uploader::UploadError;

    #[derive(Clone, Default)]
    struct NullTransport {
        calls: Arc<Mutex<usize>>,
    }

    impl UploadTransport for NullTransport {
        async fn send(&self, _url: &str, _body: String) -> Result<u16, UploadError> {
            *self.calls.lock().unwrap() += 1;
            Ok(200)
        }
    }

    fn test_settings() -> Settings {
        Settings {
            server_url: "https://collector.example/loc".into(),
            user_name: "tester".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_worker_start_stop_lifecycle() {
        let (provider, _injector, fix_rx) = ChannelProvider::new(8);
        let handle = Worker::start(
            test_settings(),
            provider,
            fix_rx,
            NullTransport::default(),
            CountingWakeToken::new(),
        )
        .unwrap();

        let mut lifecycle = handle.observe_lifecycle();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if *lifecycle.borrow_and_update() == WorkerLifecycleState::Running {
                    return;
                }
                lifecycle.changed().await.unwrap();
            }
        })
        .await
        .expect("Worker should reach Running");

        handle.stop().await;
        assert_eq!(handle.lifecycle(), WorkerLifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_set_interval_validation_surfaces() {
        let (provider, _injector, fix_rx) = ChannelProvider::new(8);
        let handle = Worker::start(
            test_settings(),
            provider,
            fix_rx,
            NullTransport::default(),
            CountingWakeToken::new(),
        )
        .unwrap();

        assert!(!handle.set_interval(IntervalKind::Wake, 1_000));
        assert_eq!(handle.config().get().wake_interval_ms, 60_000);

        assert!(handle.set_interval(IntervalKind::Wake, 120_000));
        assert!(handle.set_interval(IntervalKind::Foreground, 2_000));
        assert!(!handle.set_interval(IntervalKind::Background, -1));

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_out_of_bounds_initial_wake_interval_is_clamped() {
        let mut settings = test_settings();
        settings.wake_interval_ms = 5; // below the floor

        let (provider, _injector, fix_rx) = ChannelProvider::new(8);
        let handle = Worker::start(
            settings,
            provider,
            fix_rx,
            NullTransport::default(),
            CountingWakeToken::new(),
        )
        .unwrap();

        // The store exposes the clamped value, never the raw one
        assert_eq!(
            handle.config().get().wake_interval_ms,
            WAKE_INTERVAL_MIN_MS
        );

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_above_ceiling_initial_wake_interval_is_clamped() {
        let mut settings = test_settings();
        settings.wake_interval_ms = 9_000_000; // above the ceiling

        let (provider, _injector, fix_rx) = ChannelProvider::new(8);
        let handle = Worker::start(
            settings,
            provider,
            fix_rx,
            NullTransport::default(),
            CountingWakeToken::new(),
        )
        .unwrap();

        assert_eq!(
            handle.config().get().wake_interval_ms,
            WAKE_INTERVAL_MAX_MS
        );

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_foreground_mode_edge() {
        let (provider, _injector, fix_rx) = ChannelProvider::new(8);
        let handle = Worker::start(
            test_settings(),
            provider,
            fix_rx,
            NullTransport::default(),
            CountingWakeToken::new(),
        )
        .unwrap();

        assert!(handle.set_foreground_mode(true));
        assert!(!handle.set_foreground_mode(true));
        assert!(handle.set_foreground_mode(false));

        handle.stop().await;
    }
}
