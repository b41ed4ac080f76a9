//! The upload pipeline task.
//!
//! Consumes the engine's fix stream and decides, per fix, whether to send:
//!
//! - uploads disabled or no collector URL: skip silently, status untouched
//! - otherwise a fix is eligible iff the mode-selected interval has
//!   elapsed since the last attempt (monotonic clock, read at decision
//!   time)
//! - `last_send` is stamped on every attempt, success or failure, so a
//!   failing collector cannot trigger a retry storm - the next eligible
//!   attempt waits a full interval regardless of outcome
//!
//! Forced sends (mode transition, wake cycle, manual trigger) bypass the
//! elapsed-time check but still require active upload and a known fix.
//!
//! Sends are serialized on the pipeline task: one attempt at a time, in
//! arrival order. There is no automatic retry; the next natural or forced
//! trigger is the retry mechanism.

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::payload::FixPayload;
use super::transport::{UploadError, UploadTransport};
use crate::config::Settings;
use crate::fix::{DeliveryStatus, ForegroundMode, LocationFix};

/// Why a send attempt was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendReason {
    /// A fix arrived and the throttle interval had elapsed.
    Periodic,
    /// Foreground/background transition.
    ModeChange,
    /// Wake-cycle notification from the scheduler.
    WakeCycle,
    /// Explicit caller request.
    Manual,
}

impl SendReason {
    fn is_forced(&self) -> bool {
        !matches!(self, Self::Periodic)
    }
}

impl std::fmt::Display for SendReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Periodic => write!(f, "periodic"),
            Self::ModeChange => write!(f, "mode-change"),
            Self::WakeCycle => write!(f, "wake-cycle"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Upload pipeline entry point.
pub struct UploadPipeline;

impl UploadPipeline {
    /// Spawn the pipeline task and return a handle to it.
    ///
    /// - `config_rx` - live settings (URL, user, enabled flag, intervals)
    /// - `mode_rx` - foreground mode cell; every transition forces a send
    /// - `fix_rx` - the engine's fix event stream
    /// - `latest_rx` - the engine's last-known-good cell, for forced sends
    pub fn start<T>(
        transport: T,
        config_rx: watch::Receiver<Settings>,
        mode_rx: watch::Receiver<ForegroundMode>,
        fix_rx: broadcast::Receiver<LocationFix>,
        latest_rx: watch::Receiver<Option<LocationFix>>,
    ) -> UploadPipelineHandle
    where
        T: UploadTransport + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(DeliveryStatus::Idle);
        let cancel = CancellationToken::new();

        let task = PipelineTask {
            transport,
            config_rx,
            mode_rx,
            fix_rx,
            latest_rx,
            cmd_rx,
            status_tx,
            cancel: cancel.child_token(),
            last_send: None,
        };
        tokio::spawn(task.run());

        UploadPipelineHandle {
            cmd_tx,
            status_rx,
            cancel,
        }
    }
}

/// Cloneable handle to a running upload pipeline.
#[derive(Clone)]
pub struct UploadPipelineHandle {
    cmd_tx: mpsc::Sender<SendReason>,
    status_rx: watch::Receiver<DeliveryStatus>,
    cancel: CancellationToken,
}

impl UploadPipelineHandle {
    /// Send the last-known fix immediately, bypassing the throttle.
    /// Intended for explicit user action.
    pub async fn upload_latest(&self) {
        self.send(SendReason::Manual).await;
    }

    /// Wake-cycle notification: attempt a forced delivery of the latest
    /// fix. Called by the scheduler after the settle delay.
    pub async fn notify_wake_cycle(&self) {
        self.send(SendReason::WakeCycle).await;
    }

    /// Current delivery status.
    pub fn status(&self) -> DeliveryStatus {
        self.status_rx.borrow().clone()
    }

    /// Observe delivery-status changes.
    pub fn observe_status(&self) -> watch::Receiver<DeliveryStatus> {
        self.status_rx.clone()
    }

    /// Tear down the pipeline task. In-flight sends complete or time out
    /// on their own; this only stops accepting new work.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn send(&self, reason: SendReason) {
        if self.cmd_tx.send(reason).await.is_err() {
            tracing::debug!("Pipeline task gone, trigger dropped");
        }
    }
}

struct PipelineTask<T> {
    transport: T,
    config_rx: watch::Receiver<Settings>,
    mode_rx: watch::Receiver<ForegroundMode>,
    fix_rx: broadcast::Receiver<LocationFix>,
    latest_rx: watch::Receiver<Option<LocationFix>>,
    cmd_rx: mpsc::Receiver<SendReason>,
    status_tx: watch::Sender<DeliveryStatus>,
    cancel: CancellationToken,
    last_send: Option<Instant>,
}

impl<T: UploadTransport> PipelineTask<T> {
    async fn run(mut self) {
        tracing::info!("Upload pipeline started");
        // Throttle from startup: the first natural send waits one interval
        self.last_send = Some(Instant::now());
        let mut mode_open = true;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                result = self.fix_rx.recv() => match result {
                    Ok(fix) => self.on_fix(fix).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Fix stream lagged, skipping old fixes");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Fix stream closed, pipeline stopping");
                        break;
                    }
                },

                result = self.mode_rx.changed(), if mode_open => match result {
                    Ok(()) => {
                        let mode = *self.mode_rx.borrow_and_update();
                        tracing::debug!(%mode, "Mode transition, forcing send");
                        self.forced_send(SendReason::ModeChange).await;
                    }
                    Err(_) => mode_open = false,
                },

                maybe_reason = self.cmd_rx.recv() => match maybe_reason {
                    Some(reason) => self.forced_send(reason).await,
                    None => break,
                },
            }
        }

        tracing::info!("Upload pipeline stopped");
    }

    /// Handle one fix from the stream: throttle check, then send.
    async fn on_fix(&mut self, fix: LocationFix) {
        let settings = self.config_rx.borrow().clone();
        if !settings.upload_active() {
            tracing::trace!("Upload inactive, fix skipped");
            return;
        }

        let foreground = *self.mode_rx.borrow() == ForegroundMode::Foreground;
        let interval = settings.upload_interval(foreground);
        let now = Instant::now();
        let eligible = match self.last_send {
            None => true,
            Some(last) => now - last >= interval,
        };

        if !eligible {
            tracing::trace!(
                interval_ms = interval.as_millis() as u64,
                "Throttled, fix skipped"
            );
            return;
        }

        self.attempt_send(fix, &settings, SendReason::Periodic).await;
    }

    /// Forced send of the last-known fix, bypassing the throttle.
    /// Still requires active upload and a known fix.
    async fn forced_send(&mut self, reason: SendReason) {
        debug_assert!(reason.is_forced());

        let settings = self.config_rx.borrow().clone();
        if !settings.upload_active() {
            tracing::debug!(%reason, "Upload inactive, forced send skipped");
            return;
        }

        let Some(fix) = self.latest_rx.borrow().clone() else {
            tracing::debug!(%reason, "No known fix, forced send skipped");
            return;
        };

        self.attempt_send(fix, &settings, reason).await;
    }

    /// One delivery attempt. Stamps `last_send` unconditionally so a
    /// failure still waits a full interval before the next natural send.
    async fn attempt_send(&mut self, fix: LocationFix, settings: &Settings, reason: SendReason) {
        self.last_send = Some(Instant::now());
        self.status_tx.send_replace(DeliveryStatus::Uploading);

        let payload = FixPayload::from_fix(&fix, &settings.user_name);
        let body = match serde_json::to_string(&payload) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "Payload serialization failed");
                self.status_tx.send_replace(DeliveryStatus::Error {
                    message: e.to_string(),
                });
                return;
            }
        };

        let status = match self.transport.send(&settings.server_url, body).await {
            Ok(code) if (200..300).contains(&code) => {
                tracing::info!(%reason, code, "Fix uploaded");
                DeliveryStatus::Success { code }
            }
            Ok(code) => {
                tracing::warn!(%reason, code, "Collector rejected fix");
                DeliveryStatus::Error {
                    message: format!("server responded {}", code),
                }
            }
            Err(UploadError::Transport(message)) | Err(UploadError::ClientBuild(message)) => {
                tracing::warn!(%reason, error = %message, "Upload failed");
                DeliveryStatus::Error { message }
            }
        };
        self.status_tx.send_replace(status);
    }
}
