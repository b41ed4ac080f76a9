//! Live configuration store with change notification.
//!
//! Wraps a [`Settings`] snapshot in a `tokio::sync::watch` channel:
//! point reads copy the snapshot, writes publish a whole new snapshot, and
//! observers receive every published change. Readers never see a torn
//! value because writers replace the snapshot atomically.

use tokio::sync::watch;

use super::keys::{ConfigKey, ConfigKeyError};
use super::settings::{wake_interval_in_bounds, IntervalKind, Settings};

/// Live, observable configuration store.
///
/// Cloning the store is cheap and shares the underlying cell; the worker
/// keeps one clone and hands others to whoever needs write access.
#[derive(Clone)]
pub struct ConfigStore {
    tx: watch::Sender<Settings>,
}

impl ConfigStore {
    /// Create a store seeded with the given settings.
    pub fn new(settings: Settings) -> Self {
        let (tx, _rx) = watch::channel(settings);
        Self { tx }
    }

    /// Copy-on-read snapshot of the current settings.
    pub fn get(&self) -> Settings {
        self.tx.borrow().clone()
    }

    /// Subscribe to settings changes.
    ///
    /// The receiver is primed with the current snapshot; `changed()` fires
    /// on every subsequent write.
    pub fn observe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    /// Set a value by key name, with per-key validation.
    pub fn set(&self, key: ConfigKey, value: &str) -> Result<(), ConfigKeyError> {
        let mut settings = self.get();
        key.set(&mut settings, value)?;
        self.publish(settings);
        Ok(())
    }

    /// Read a value by key name.
    pub fn get_key(&self, key: ConfigKey) -> String {
        key.get(&self.tx.borrow())
    }

    /// Replace the collector URL. Empty disables uploads.
    pub fn set_server_url(&self, url: impl Into<String>) {
        let mut settings = self.get();
        settings.server_url = url.into();
        self.publish(settings);
    }

    /// Replace the user identifier.
    pub fn set_user_name(&self, name: impl Into<String>) {
        let mut settings = self.get();
        settings.user_name = name.into();
        self.publish(settings);
    }

    /// Flip the master upload switch.
    pub fn set_upload_enabled(&self, enabled: bool) {
        let mut settings = self.get();
        settings.upload_enabled = enabled;
        self.publish(settings);
    }

    /// Set an interval. Returns `false` and keeps the previous value if
    /// the new one fails validation (wake interval outside its bounds, or
    /// a non-positive upload interval).
    pub fn set_interval(&self, kind: IntervalKind, ms: i64) -> bool {
        let mut settings = self.get();
        match kind {
            IntervalKind::Foreground | IntervalKind::Background => {
                if ms <= 0 {
                    tracing::warn!(%kind, ms, "Rejected non-positive upload interval");
                    return false;
                }
                if kind == IntervalKind::Foreground {
                    settings.foreground_interval_ms = ms;
                } else {
                    settings.background_interval_ms = ms;
                }
            }
            IntervalKind::Wake => {
                if !wake_interval_in_bounds(ms) {
                    tracing::warn!(
                        ms,
                        "Rejected wake interval outside [60000, 1800000], keeping previous"
                    );
                    return false;
                }
                settings.wake_interval_ms = ms;
            }
        }
        self.publish(settings);
        true
    }

    fn publish(&self, settings: Settings) {
        // send_if_modified so identical writes don't wake observers
        self.tx.send_if_modified(|current| {
            if *current == settings {
                false
            } else {
                *current = settings;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_on_read() {
        let store = ConfigStore::new(Settings::default());
        let mut snapshot = store.get();
        snapshot.user_name = "local mutation".into();
        assert_eq!(store.get().user_name, "");
    }

    #[test]
    fn test_set_interval_validation() {
        let store = ConfigStore::new(Settings::default());

        assert!(store.set_interval(IntervalKind::Foreground, 2_000));
        assert_eq!(store.get().foreground_interval_ms, 2_000);

        assert!(!store.set_interval(IntervalKind::Wake, 5_000));
        assert_eq!(store.get().wake_interval_ms, 60_000);

        assert!(store.set_interval(IntervalKind::Wake, 120_000));
        assert_eq!(store.get().wake_interval_ms, 120_000);

        assert!(!store.set_interval(IntervalKind::Background, 0));
        assert_eq!(store.get().background_interval_ms, 180_000);
    }

    #[tokio::test]
    async fn test_observe_sees_changes() {
        let store = ConfigStore::new(Settings::default());
        let mut rx = store.observe();

        store.set_server_url("https://collector.example/loc");
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow_and_update().server_url,
            "https://collector.example/loc"
        );
    }

    #[tokio::test]
    async fn test_identical_write_does_not_notify() {
        let store = ConfigStore::new(Settings::default());
        let mut rx = store.observe();
        rx.borrow_and_update();

        store.set_upload_enabled(true); // already true
        assert!(!rx.has_changed().unwrap());

        store.set_upload_enabled(false);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_set_by_key() {
        let store = ConfigStore::new(Settings::default());
        store.set(ConfigKey::UserName, "bob").unwrap();
        assert_eq!(store.get_key(ConfigKey::UserName), "bob");

        let result = store.set(ConfigKey::WakeIntervalMs, "10");
        assert!(result.is_err());
        assert_eq!(store.get().wake_interval_ms, 60_000);
    }
}
