//! GeoBeacon - background location acquisition and upload agent
//!
//! This library implements a long-running worker that continuously acquires
//! positional fixes from a pluggable positioning provider and forwards them
//! to a remote HTTP collector, with foreground/background-aware throttling,
//! guaranteed periodic wake cycles, and live-reloadable configuration.
//!
//! # High-Level API
//!
//! For most use cases, the [`worker`] module provides the assembled agent:
//!
//! ```ignore
//! use geobeacon::config::Settings;
//! use geobeacon::provider::ChannelProvider;
//! use geobeacon::scheduler::CountingWakeToken;
//! use geobeacon::uploader::HttpTransport;
//! use geobeacon::worker::Worker;
//!
//! let settings = Settings::default();
//! let (provider, injector, fix_rx) = ChannelProvider::new(32);
//! let handle = Worker::start(settings, provider, fix_rx,
//!     HttpTransport::new()?, CountingWakeToken::new())?;
//!
//! // Observe delivery status, flip foreground mode, etc.
//! let mut status = handle.observe_delivery_status();
//! handle.set_foreground_mode(true);
//! ```

pub mod config;
pub mod engine;
pub mod fix;
pub mod link;
pub mod logging;
pub mod provider;
pub mod scheduler;
pub mod uploader;
pub mod worker;

/// Version of the GeoBeacon library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
