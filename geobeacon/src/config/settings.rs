//! Settings snapshot and interval bounds.
//!
//! [`Settings`] is a pure data type with no parsing or notification logic.
//! Components always work on a copied snapshot (copy-on-read), never on a
//! shared mutable reference.

use std::time::Duration;

/// Default upload interval while the host application is visible.
pub const DEFAULT_FOREGROUND_INTERVAL_MS: i64 = 5_000;

/// Default upload interval while the host application is backgrounded.
pub const DEFAULT_BACKGROUND_INTERVAL_MS: i64 = 180_000;

/// Default wake-cycle period.
pub const DEFAULT_WAKE_INTERVAL_MS: i64 = 60_000;

/// Minimum accepted wake-cycle period (1 minute).
pub const WAKE_INTERVAL_MIN_MS: i64 = 60_000;

/// Maximum accepted wake-cycle period (30 minutes).
pub const WAKE_INTERVAL_MAX_MS: i64 = 1_800_000;

/// Which throttle/wake interval a caller is addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalKind {
    /// Upload interval applied in foreground mode.
    Foreground,
    /// Upload interval applied in background mode.
    Background,
    /// Wake scheduler period, bounded to [1 min, 30 min].
    Wake,
}

impl std::fmt::Display for IntervalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Foreground => write!(f, "foreground"),
            Self::Background => write!(f, "background"),
            Self::Wake => write!(f, "wake"),
        }
    }
}

/// Complete worker configuration snapshot.
///
/// An empty `server_url` disables uploads entirely, independent of
/// `upload_enabled` - both gates must pass for a send to happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Absolute collector URL; empty string means uploads are disabled.
    pub server_url: String,

    /// User identifier attached to every payload.
    pub user_name: String,

    /// Master switch for uploads.
    pub upload_enabled: bool,

    /// Upload interval in foreground mode, milliseconds.
    pub foreground_interval_ms: i64,

    /// Upload interval in background mode, milliseconds.
    pub background_interval_ms: i64,

    /// Wake-cycle period, milliseconds. Always within
    /// [`WAKE_INTERVAL_MIN_MS`, `WAKE_INTERVAL_MAX_MS`].
    pub wake_interval_ms: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            user_name: String::new(),
            upload_enabled: true,
            foreground_interval_ms: DEFAULT_FOREGROUND_INTERVAL_MS,
            background_interval_ms: DEFAULT_BACKGROUND_INTERVAL_MS,
            wake_interval_ms: DEFAULT_WAKE_INTERVAL_MS,
        }
    }
}

impl Settings {
    /// True if both upload gates pass: enabled and a collector URL is set.
    pub fn upload_active(&self) -> bool {
        self.upload_enabled && !self.server_url.is_empty()
    }

    /// The upload interval for the given mode, as a `Duration`.
    pub fn upload_interval(&self, foreground: bool) -> Duration {
        let ms = if foreground {
            self.foreground_interval_ms
        } else {
            self.background_interval_ms
        };
        Duration::from_millis(ms.max(0) as u64)
    }

    /// The wake period as a `Duration`.
    pub fn wake_period(&self) -> Duration {
        Duration::from_millis(self.wake_interval_ms.max(0) as u64)
    }
}

/// True if `ms` is an acceptable wake-cycle period.
pub(crate) fn wake_interval_in_bounds(ms: i64) -> bool {
    (WAKE_INTERVAL_MIN_MS..=WAKE_INTERVAL_MAX_MS).contains(&ms)
}
