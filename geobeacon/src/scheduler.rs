//! Wake scheduler - guaranteed periodic acquisition-and-upload cycles.
//!
//! The scheduler fires a wake cycle at a bounded, configurable period. On
//! each fire it acquires an execution-guarantee token (the in-process
//! analogue of an OS wake lock), forces a single acquisition, waits a
//! short settle delay for the provider to respond, then asks the upload
//! pipeline for a forced delivery attempt. The token is released on every
//! exit path via an RAII guard.
//!
//! # State machine
//!
//! `Stopped → Scheduled` on start, `Scheduled → Firing → Scheduled` on
//! each period, `Scheduled → Stopped` on stop. Starting twice and stopping
//! twice are no-ops.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{WAKE_INTERVAL_MAX_MS, WAKE_INTERVAL_MIN_MS};

/// Default settle delay between forced acquisition and forced upload.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Default maximum wake-token hold per cycle (safety ceiling).
pub const DEFAULT_MAX_TOKEN_HOLD: Duration = Duration::from_secs(300);

/// Errors raised by the wake scheduler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    /// Requested period is outside the accepted bounds; the previous
    /// period stays in effect.
    #[error("wake period {ms}ms outside [{min_ms}, {max_ms}]")]
    PeriodOutOfBounds { ms: i64, min_ms: i64, max_ms: i64 },
}

/// Execution-guarantee token - keeps the host awake for one wake cycle.
///
/// Hosts with a real power manager wire this to their wake-lock API. The
/// returned guard releases the token when dropped, on all exit paths.
pub trait WakeToken: Send + Sync {
    /// Acquire the token for at most `max_hold`.
    fn acquire(&self, max_hold: Duration) -> WakeGuard;
}

/// RAII guard for an acquired wake token.
///
/// Dropping the guard releases the token. If the guard outlived its
/// maximum hold the release still happens, with a warning - the ceiling
/// exists so a stuck cycle cannot pin the CPU indefinitely.
pub struct WakeGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
    acquired_at: Instant,
    max_hold: Duration,
}

impl WakeGuard {
    /// Build a guard around a release action.
    pub fn new(max_hold: Duration, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
            acquired_at: Instant::now(),
            max_hold,
        }
    }
}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        let held = self.acquired_at.elapsed();
        if held > self.max_hold {
            tracing::warn!(
                held_secs = held.as_secs(),
                max_secs = self.max_hold.as_secs(),
                "Wake token held past its ceiling"
            );
        }
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Reference-counted wake token for hosts without a power manager.
///
/// Tracks how many guards are outstanding; useful as a diagnostic and as
/// the default token in tests and the CLI.
#[derive(Clone, Default)]
pub struct CountingWakeToken {
    held: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
}

impl CountingWakeToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of guards currently outstanding.
    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    /// Total acquisitions since creation.
    pub fn total_acquisitions(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl WakeToken for CountingWakeToken {
    fn acquire(&self, max_hold: Duration) -> WakeGuard {
        self.held.fetch_add(1, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        let held = self.held.clone();
        WakeGuard::new(max_hold, move || {
            held.fetch_sub(1, Ordering::SeqCst);
        })
    }
}

/// The work a wake cycle performs, implemented by the worker.
///
/// Split out as a trait so the scheduler can be exercised without a full
/// engine and pipeline behind it.
pub trait WakeCycleHandler: Send + Sync {
    /// Force a single acquisition from the provider.
    fn force_acquisition(&self) -> impl Future<Output = ()> + Send;

    /// Ask the upload pipeline for a forced delivery attempt.
    fn force_upload(&self) -> impl Future<Output = ()> + Send;
}

/// Scheduler state, observable through the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    /// Timer not registered.
    #[default]
    Stopped,
    /// Timer armed, waiting for the next period.
    Scheduled,
    /// A wake cycle is executing.
    Firing,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Scheduled => write!(f, "Scheduled"),
            Self::Firing => write!(f, "Firing"),
        }
    }
}

/// Configuration for the wake scheduler.
#[derive(Debug, Clone)]
pub struct WakeSchedulerConfig {
    /// Wake period. Must be within `period_bounds`.
    pub period: Duration,

    /// Delay between forced acquisition and forced upload, giving the
    /// provider time to respond.
    pub settle_delay: Duration,

    /// Maximum wake-token hold per cycle.
    pub max_token_hold: Duration,

    /// Accepted period range in milliseconds. Hosts keep the default
    /// ([`WAKE_INTERVAL_MIN_MS`], [`WAKE_INTERVAL_MAX_MS`]); tests shrink
    /// it to run on short timers.
    pub period_bounds: (i64, i64),
}

impl Default for WakeSchedulerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(WAKE_INTERVAL_MIN_MS as u64),
            settle_delay: DEFAULT_SETTLE_DELAY,
            max_token_hold: DEFAULT_MAX_TOKEN_HOLD,
            period_bounds: (WAKE_INTERVAL_MIN_MS, WAKE_INTERVAL_MAX_MS),
        }
    }
}

enum SchedulerCommand {
    Start,
    Stop,
}

/// Wake scheduler entry point.
pub struct WakeScheduler;

impl WakeScheduler {
    /// Spawn the scheduler task and return a handle to it.
    ///
    /// The scheduler starts in `Stopped`; call [`WakeSchedulerHandle::start`]
    /// to arm the timer.
    pub fn start<W, H>(
        token: W,
        handler: H,
        config: WakeSchedulerConfig,
    ) -> Result<WakeSchedulerHandle, ScheduleError>
    where
        W: WakeToken + 'static,
        H: WakeCycleHandler + 'static,
    {
        validate_period(duration_ms(config.period), config.period_bounds)?;

        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (period_tx, period_rx) = watch::channel(config.period);
        let (state_tx, state_rx) = watch::channel(SchedulerState::Stopped);
        let cancel = CancellationToken::new();

        let task = SchedulerTask {
            token,
            handler,
            cmd_rx,
            period_rx,
            state_tx,
            cancel: cancel.child_token(),
            settle_delay: config.settle_delay,
            max_token_hold: config.max_token_hold,
        };
        tokio::spawn(task.run());

        Ok(WakeSchedulerHandle {
            cmd_tx,
            period_tx,
            state_rx,
            period_bounds: config.period_bounds,
            cancel,
        })
    }
}

/// Cloneable handle to a running wake scheduler.
#[derive(Clone)]
pub struct WakeSchedulerHandle {
    cmd_tx: mpsc::Sender<SchedulerCommand>,
    period_tx: watch::Sender<Duration>,
    state_rx: watch::Receiver<SchedulerState>,
    period_bounds: (i64, i64),
    cancel: CancellationToken,
}

impl WakeSchedulerHandle {
    /// Arm the timer. A no-op if already scheduled.
    pub async fn start(&self) {
        self.send(SchedulerCommand::Start).await;
    }

    /// Cancel the timer. A no-op if already stopped.
    pub async fn stop(&self) {
        self.send(SchedulerCommand::Stop).await;
    }

    /// Change the wake period.
    ///
    /// Rejects values outside the accepted bounds; the previous period
    /// stays in effect. If the timer is armed it is re-registered with the
    /// new period immediately.
    pub fn set_period(&self, ms: i64) -> Result<(), ScheduleError> {
        validate_period(ms, self.period_bounds)?;
        let period = Duration::from_millis(ms as u64);
        self.period_tx.send_if_modified(|current| {
            if *current == period {
                false
            } else {
                *current = period;
                true
            }
        });
        Ok(())
    }

    /// Current period.
    pub fn period(&self) -> Duration {
        *self.period_tx.borrow()
    }

    /// Current scheduler state.
    pub fn state(&self) -> SchedulerState {
        *self.state_rx.borrow()
    }

    /// Observe scheduler state transitions.
    pub fn observe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state_rx.clone()
    }

    /// Tear down the scheduler task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn send(&self, cmd: SchedulerCommand) {
        if self.cmd_tx.send(cmd).await.is_err() {
            tracing::debug!("Scheduler task gone, command dropped");
        }
    }
}

fn duration_ms(d: Duration) -> i64 {
    d.as_millis().min(i64::MAX as u128) as i64
}

fn validate_period(ms: i64, bounds: (i64, i64)) -> Result<(), ScheduleError> {
    let (min_ms, max_ms) = bounds;
    if (min_ms..=max_ms).contains(&ms) {
        Ok(())
    } else {
        Err(ScheduleError::PeriodOutOfBounds { ms, min_ms, max_ms })
    }
}

struct SchedulerTask<W, H> {
    token: W,
    handler: H,
    cmd_rx: mpsc::Receiver<SchedulerCommand>,
    period_rx: watch::Receiver<Duration>,
    state_tx: watch::Sender<SchedulerState>,
    cancel: CancellationToken,
    settle_delay: Duration,
    max_token_hold: Duration,
}

impl<W: WakeToken, H: WakeCycleHandler> SchedulerTask<W, H> {
    async fn run(mut self) {
        tracing::info!("Wake scheduler started");
        let mut next_fire: Option<Instant> = None;

        loop {
            let armed = next_fire;
            let timer = async move {
                match armed {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,

                maybe_cmd = self.cmd_rx.recv() => match maybe_cmd {
                    Some(SchedulerCommand::Start) => {
                        if next_fire.is_none() {
                            let period = *self.period_rx.borrow_and_update();
                            next_fire = Some(Instant::now() + period);
                            self.set_state(SchedulerState::Scheduled);
                            tracing::info!(period_ms = period.as_millis() as u64, "Wake timer armed");
                        }
                    }
                    Some(SchedulerCommand::Stop) => {
                        if next_fire.take().is_some() {
                            self.set_state(SchedulerState::Stopped);
                            tracing::info!("Wake timer cancelled");
                        }
                    }
                    None => break,
                },

                result = self.period_rx.changed() => {
                    if result.is_err() {
                        break;
                    }
                    let period = *self.period_rx.borrow_and_update();
                    if next_fire.is_some() {
                        // Re-register the running timer with the new period
                        next_fire = Some(Instant::now() + period);
                        tracing::info!(
                            period_ms = period.as_millis() as u64,
                            "Wake timer re-registered"
                        );
                    }
                }

                _ = timer => {
                    self.fire().await;
                    let period = *self.period_rx.borrow_and_update();
                    next_fire = Some(Instant::now() + period);
                }
            }
        }

        tracing::info!("Wake scheduler stopped");
    }

    /// One wake cycle. The guard releases the token on every exit path.
    ///
    /// A cycle runs to completion before the loop sees the next command,
    /// so `stop()` or `set_period()` issued mid-cycle take effect after
    /// the forced upload. Shutdown cancellation is the exception: it
    /// aborts the cycle during the settle delay, skipping the upload.
    async fn fire(&self) {
        self.set_state(SchedulerState::Firing);
        tracing::debug!("Wake cycle firing");

        let _guard = self.token.acquire(self.max_token_hold);
        self.handler.force_acquisition().await;

        tokio::select! {
            _ = self.cancel.cancelled() => {
                tracing::debug!("Wake cycle aborted during settle delay");
                return;
            }
            _ = tokio::time::sleep(self.settle_delay) => {}
        }

        self.handler.force_upload().await;
        self.set_state(SchedulerState::Scheduled);
    }

    fn set_state(&self, state: SchedulerState) {
        self.state_tx.send_replace(state);
    }
}
