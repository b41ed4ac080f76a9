//! Positioning provider abstraction.
//!
//! The agent consumes fixes, it does not produce them: real GPS stacks are
//! external collaborators behind the [`PositionProvider`] trait. Fixes are
//! delivered through an `mpsc` channel the provider is constructed with,
//! so the acquisition engine owns the receiving end and the provider can
//! push from whatever thread or callback context it lives in.
//!
//! # Acquisition modes
//!
//! The trait has two explicit acquisition methods instead of a mode flag:
//!
//! - [`PositionProvider::acquire_continuous`] - stream fixes until `stop()`
//! - [`PositionProvider::acquire_once`] - deliver exactly one fix
//!
//! A one-shot acquisition never disturbs a running continuous stream, so
//! the engine's mode is never ambiguous.

mod channel;

pub use channel::{ChannelProvider, FixInjector};

use std::future::Future;

use thiserror::Error;

/// Errors raised by a positioning provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network reachability precondition failed; initialization should be
    /// retried after a delay.
    #[error("network unreachable, provider cannot initialize")]
    Unreachable,

    /// Provider construction or startup failed.
    #[error("provider initialization failed: {0}")]
    InitFailed(String),

    /// A reading failed; the fix stream stays open.
    #[error("provider read failed (code {code}): {message}")]
    ReadFailed { code: i32, message: String },

    /// The fix channel's receiving end is gone.
    #[error("fix channel closed")]
    ChannelClosed,
}

/// A source of positional fixes.
///
/// Implementations push [`LocationFix`](crate::fix::LocationFix) values
/// into the channel they were constructed with. All methods are expected
/// to return quickly; long-running acquisition happens on the provider's
/// own tasks or threads.
pub trait PositionProvider: Send + Sync {
    /// Start continuous fix delivery. Idempotent.
    fn acquire_continuous(&self) -> impl Future<Output = Result<(), ProviderError>> + Send;

    /// Deliver exactly one fix, without disturbing continuous delivery.
    fn acquire_once(&self) -> impl Future<Output = Result<(), ProviderError>> + Send;

    /// Stop continuous delivery. The provider handle stays usable; a later
    /// `acquire_continuous` resumes the stream.
    fn stop(&self) -> impl Future<Output = Result<(), ProviderError>> + Send;
}

/// Network reachability probe, a precondition for provider initialization.
///
/// Real hosts wire this to their connectivity monitor. The engine retries
/// initialization on a fixed delay while this reports `false`.
pub trait Reachability: Send + Sync {
    /// True if the network is currently reachable.
    fn is_reachable(&self) -> impl Future<Output = bool> + Send;
}

/// Reachability probe that always reports reachable.
///
/// The default for hosts without a connectivity monitor.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReachable;

impl Reachability for AlwaysReachable {
    async fn is_reachable(&self) -> bool {
        true
    }
}
