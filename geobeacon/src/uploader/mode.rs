//! Foreground mode tracker.
//!
//! A single externally-set flag. The presentation layer calls
//! [`ForegroundModeTracker::set_foreground`] on visibility changes; the
//! upload pipeline observes the cell and forces an immediate send on every
//! actual transition. Setting the same value twice is a no-op - the watch
//! cell only notifies on modification, so no forced send fires.

use tokio::sync::watch;

use crate::fix::ForegroundMode;

/// Externally-set foreground/background flag with edge detection.
#[derive(Clone)]
pub struct ForegroundModeTracker {
    tx: watch::Sender<ForegroundMode>,
}

impl Default for ForegroundModeTracker {
    fn default() -> Self {
        Self::new(ForegroundMode::Background)
    }
}

impl ForegroundModeTracker {
    /// Create a tracker with the given initial mode.
    pub fn new(initial: ForegroundMode) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Set the mode from the presentation layer's boolean.
    ///
    /// Returns `true` if this was an actual transition; repeated sets of
    /// the same value return `false` and notify nobody.
    pub fn set_foreground(&self, foreground: bool) -> bool {
        let mode = ForegroundMode::from_foreground(foreground);
        let changed = self.tx.send_if_modified(|current| {
            if *current == mode {
                false
            } else {
                *current = mode;
                true
            }
        });
        if changed {
            tracing::info!(%mode, "Foreground mode changed");
        }
        changed
    }

    /// Current mode.
    pub fn mode(&self) -> ForegroundMode {
        *self.tx.borrow()
    }

    /// Observe mode transitions.
    pub fn observe(&self) -> watch::Receiver<ForegroundMode> {
        self.tx.subscribe()
    }
}
