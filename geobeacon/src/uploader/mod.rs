//! Upload pipeline - decides when to send fixes and delivers them.
//!
//! The pipeline subscribes to the engine's fix stream, applies the
//! mode-selected throttle interval, serializes eligible fixes to the
//! collector's wire format and POSTs them over HTTP. Delivery status is
//! published through a watch cell.
//!
//! # Components
//!
//! - [`FixPayload`] - the stable JSON wire format
//! - [`UploadTransport`] / [`HttpTransport`] - the network seam
//! - [`ForegroundModeTracker`] - the externally-set visibility flag
//! - [`UploadPipeline`] - the pipeline task and its handle

mod mode;
mod payload;
mod pipeline;
mod transport;

pub use mode::ForegroundModeTracker;
pub use payload::FixPayload;
pub use pipeline::{SendReason, UploadPipeline, UploadPipelineHandle};
pub use transport::{HttpTransport, UploadError, UploadTransport};
