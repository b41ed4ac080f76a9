//! Configuration for the GeoBeacon worker.
//!
//! Three layers, mirroring how settings flow through the agent:
//!
//! - [`Settings`] - a plain snapshot of every tunable (pure data)
//! - [`ConfigKey`] - typed get/set by key name, with validation
//! - [`ConfigStore`] - the live store: point reads, validated writes, and
//!   a change-notification stream for components that reconfigure on the fly
//!
//! The persisted-settings mechanism (disk, platform key/value store) is an
//! external collaborator; hosts load whatever they persist into a
//! [`Settings`] value and hand it to [`ConfigStore::new`].

mod keys;
mod settings;
mod store;

pub use keys::{ConfigKey, ConfigKeyError};
pub use settings::{
    IntervalKind, Settings, DEFAULT_BACKGROUND_INTERVAL_MS, DEFAULT_FOREGROUND_INTERVAL_MS,
    DEFAULT_WAKE_INTERVAL_MS, WAKE_INTERVAL_MAX_MS, WAKE_INTERVAL_MIN_MS,
};
pub use store::ConfigStore;
