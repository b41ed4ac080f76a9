//! In-process channel-backed provider.
//!
//! [`ChannelProvider`] is fed by a [`FixInjector`] from anywhere in the
//! host process: platform callback shims, replay harnesses, simulators and
//! tests all push fixes through the same path. Delivery respects the
//! acquisition mode: injected fixes flow while continuous delivery is
//! active, a one-shot request passes exactly one fix through, and
//! everything else is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{PositionProvider, ProviderError};
use crate::fix::LocationFix;

/// Shared delivery gate between provider and injector.
struct Gate {
    continuous: AtomicBool,
    one_shot_pending: AtomicBool,
}

/// Positioning provider fed through an in-process channel.
pub struct ChannelProvider {
    gate: Arc<Gate>,
}

/// Handle used by the fix source to push readings into the provider.
#[derive(Clone)]
pub struct FixInjector {
    gate: Arc<Gate>,
    fix_tx: mpsc::Sender<LocationFix>,
}

impl ChannelProvider {
    /// Create a provider, its injector, and the receiving end of the fix
    /// channel (handed to the acquisition engine).
    pub fn new(
        capacity: usize,
    ) -> (Self, FixInjector, mpsc::Receiver<LocationFix>) {
        let (fix_tx, fix_rx) = mpsc::channel(capacity);
        let gate = Arc::new(Gate {
            continuous: AtomicBool::new(false),
            one_shot_pending: AtomicBool::new(false),
        });
        let provider = Self { gate: gate.clone() };
        let injector = FixInjector { gate, fix_tx };
        (provider, injector, fix_rx)
    }
}

impl PositionProvider for ChannelProvider {
    async fn acquire_continuous(&self) -> Result<(), ProviderError> {
        self.gate.continuous.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn acquire_once(&self) -> Result<(), ProviderError> {
        self.gate.one_shot_pending.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        self.gate.continuous.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl FixInjector {
    /// Push a reading into the provider.
    ///
    /// Returns `true` if the fix was delivered - either continuous
    /// delivery is active, or a one-shot request was pending (which this
    /// fix consumes). Dropped fixes return `false`.
    pub async fn inject(&self, fix: LocationFix) -> bool {
        let deliver = if self.gate.continuous.load(Ordering::SeqCst) {
            true
        } else {
            self.gate.one_shot_pending.swap(false, Ordering::SeqCst)
        };

        if !deliver {
            tracing::trace!("Fix dropped, no acquisition active");
            return false;
        }

        if self.fix_tx.send(fix).await.is_err() {
            tracing::debug!("Fix channel closed, dropping fix");
            return false;
        }
        true
    }
}
