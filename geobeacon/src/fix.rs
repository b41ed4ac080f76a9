//! Core value types for location tracking.
//!
//! This module defines the fundamental types used throughout the agent:
//!
//! - [`LocationFix`] - A single positional reading with metadata
//! - [`DeliveryStatus`] - Upload outcome published by the pipeline
//! - [`ForegroundMode`] - Which throttle interval applies
//! - [`WorkerLifecycleState`] - Worker state machine

use std::time::Instant;

use chrono::{DateTime, Utc};

/// A single positional reading produced by the positioning provider.
///
/// Immutable once created; each provider callback produces a fresh fix
/// that supersedes the previous one. The core retains no history - only
/// the last known good fix is kept, in the engine's latest-fix cell.
///
/// # Timestamps
///
/// `timestamp` is the wall-clock time used in upload payloads.
/// `monotonic` is the instant the fix was observed by this process and is
/// what throttle decisions compare against - wall time can jump, the
/// monotonic clock cannot.
///
/// # Errors
///
/// A provider may deliver a failed reading. `error_code` is zero for a
/// successful fix; a non-zero code carries a provider-specific reason in
/// `error_info`. Failed fixes never overwrite the last known good fix.
#[derive(Debug, Clone)]
pub struct LocationFix {
    /// Latitude in degrees (-90 to 90).
    pub latitude: f64,

    /// Longitude in degrees (-180 to 180).
    pub longitude: f64,

    /// Horizontal accuracy in meters (lower is better).
    pub accuracy: f32,

    /// Wall-clock time of the reading.
    pub timestamp: DateTime<Utc>,

    /// Monotonic time of the reading, for throttle decisions.
    pub monotonic: Instant,

    /// Full reverse-geocoded address, empty if unavailable.
    pub address: String,

    /// Country name, empty if unavailable.
    pub country: String,

    /// Province / state name, empty if unavailable.
    pub province: String,

    /// City name, empty if unavailable.
    pub city: String,

    /// District name, empty if unavailable.
    pub district: String,

    /// Street name, empty if unavailable.
    pub street: String,

    /// Street number, empty if unavailable.
    pub street_num: String,

    /// Provider city code, empty if unavailable.
    pub city_code: String,

    /// Provider administrative-area code, empty if unavailable.
    pub ad_code: String,

    /// Nearest point-of-interest name, empty if unavailable.
    pub poi_name: String,

    /// Nearest area-of-interest name, empty if unavailable.
    pub aoi_name: String,

    /// Building identifier for indoor fixes, empty if unavailable.
    pub building_id: String,

    /// Floor label for indoor fixes, empty if unavailable.
    pub floor: String,

    /// Provider GPS accuracy status code.
    pub gps_accuracy_status: i32,

    /// Provider location type code (GPS, network, cached, ...).
    pub location_type: i32,

    /// Ground speed in m/s, 0.0 if unknown.
    pub speed: f32,

    /// Bearing in degrees (0-360), 0.0 if unknown.
    pub bearing: f32,

    /// Altitude in meters, 0.0 if unknown.
    pub altitude: f64,

    /// Provider error code; 0 means success.
    pub error_code: i32,

    /// Provider error message, empty on success.
    pub error_info: String,
}

impl LocationFix {
    /// Create a successful fix at the given coordinates.
    ///
    /// All optional fields default to empty / zero; the timestamp is
    /// captured from the current wall and monotonic clocks.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: 0.0,
            timestamp: Utc::now(),
            monotonic: Instant::now(),
            address: String::new(),
            country: String::new(),
            province: String::new(),
            city: String::new(),
            district: String::new(),
            street: String::new(),
            street_num: String::new(),
            city_code: String::new(),
            ad_code: String::new(),
            poi_name: String::new(),
            aoi_name: String::new(),
            building_id: String::new(),
            floor: String::new(),
            gps_accuracy_status: 0,
            location_type: 0,
            speed: 0.0,
            bearing: 0.0,
            altitude: 0.0,
            error_code: 0,
            error_info: String::new(),
        }
    }

    /// Create a failed reading carrying a provider error.
    pub fn failed(error_code: i32, error_info: impl Into<String>) -> Self {
        let mut fix = Self::new(0.0, 0.0);
        fix.error_code = error_code;
        fix.error_info = error_info.into();
        fix
    }

    /// Set the horizontal accuracy in meters.
    pub fn with_accuracy(mut self, accuracy: f32) -> Self {
        self.accuracy = accuracy;
        self
    }

    /// Set speed (m/s), bearing (degrees) and altitude (meters).
    pub fn with_vectors(mut self, speed: f32, bearing: f32, altitude: f64) -> Self {
        self.speed = speed;
        self.bearing = bearing;
        self.altitude = altitude;
        self
    }

    /// True if this reading succeeded (error code 0).
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.error_code == 0
    }
}

/// Upload outcome for the most recent delivery attempt.
///
/// Owned exclusively by the upload pipeline; everyone else observes it
/// through a watch cell. Skipped fixes (upload disabled, empty server URL,
/// throttled) leave the status unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeliveryStatus {
    /// No upload attempted yet.
    #[default]
    Idle,
    /// A send is in flight.
    Uploading,
    /// Server accepted the payload with the given 2xx status code.
    Success { code: u16 },
    /// Send failed; transport error or non-2xx server response.
    Error { message: String },
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Uploading => write!(f, "Uploading"),
            Self::Success { code } => write!(f, "Success ({})", code),
            Self::Error { message } => write!(f, "Error: {}", message),
        }
    }
}

/// Application visibility mode, set by the presentation layer.
///
/// Selects which throttle interval the upload pipeline applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForegroundMode {
    /// Host application visible; short upload interval.
    Foreground,
    /// Host application backgrounded; long upload interval.
    #[default]
    Background,
}

impl ForegroundMode {
    /// Build from the boolean the presentation layer hands us.
    pub fn from_foreground(foreground: bool) -> Self {
        if foreground {
            Self::Foreground
        } else {
            Self::Background
        }
    }
}

impl std::fmt::Display for ForegroundMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Foreground => write!(f, "Foreground"),
            Self::Background => write!(f, "Background"),
        }
    }
}

/// Worker lifecycle state machine.
///
/// `Degraded` is reachable from `Running` when the positioning provider
/// cannot be initialized; the worker keeps retrying and recovers without
/// restarting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerLifecycleState {
    /// Not started, or fully stopped.
    #[default]
    Stopped,
    /// Start requested; components coming up.
    Initializing,
    /// All components operating normally.
    Running,
    /// Provider unavailable; retrying on a fixed delay.
    Degraded,
    /// Stop requested; accepting no new work.
    Stopping,
}

impl WorkerLifecycleState {
    /// True if `next` is a legal transition from this state.
    pub fn can_transition_to(self, next: Self) -> bool {
        use WorkerLifecycleState::*;
        matches!(
            (self, next),
            (Stopped, Initializing)
                | (Initializing, Running)
                | (Initializing, Degraded)
                | (Initializing, Stopping)
                | (Running, Degraded)
                | (Running, Stopping)
                | (Degraded, Running)
                | (Degraded, Stopping)
                | (Stopping, Stopped)
        )
    }
}

impl std::fmt::Display for WorkerLifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Running => write!(f, "Running"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Stopping => write!(f, "Stopping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_fix_is_ok() {
        let fix = LocationFix::new(31.2304, 121.4737);
        assert!(fix.is_ok());
        assert_eq!(fix.latitude, 31.2304);
        assert_eq!(fix.longitude, 121.4737);
        assert!(fix.address.is_empty());
        assert_eq!(fix.error_code, 0);
    }

    #[test]
    fn test_failed_fix() {
        let fix = LocationFix::failed(12, "missing permission");
        assert!(!fix.is_ok());
        assert_eq!(fix.error_code, 12);
        assert_eq!(fix.error_info, "missing permission");
    }

    #[test]
    fn test_fix_builders() {
        let fix = LocationFix::new(53.5, 10.0)
            .with_accuracy(8.5)
            .with_vectors(1.4, 270.0, 12.0);
        assert_eq!(fix.accuracy, 8.5);
        assert_eq!(fix.speed, 1.4);
        assert_eq!(fix.bearing, 270.0);
        assert_eq!(fix.altitude, 12.0);
    }

    #[test]
    fn test_delivery_status_display() {
        assert_eq!(DeliveryStatus::Idle.to_string(), "Idle");
        assert_eq!(
            DeliveryStatus::Success { code: 204 }.to_string(),
            "Success (204)"
        );
        assert_eq!(
            DeliveryStatus::Error {
                message: "timed out".into()
            }
            .to_string(),
            "Error: timed out"
        );
    }

    #[test]
    fn test_foreground_mode_from_bool() {
        assert_eq!(
            ForegroundMode::from_foreground(true),
            ForegroundMode::Foreground
        );
        assert_eq!(
            ForegroundMode::from_foreground(false),
            ForegroundMode::Background
        );
    }

    #[test]
    fn test_lifecycle_legal_transitions() {
        use WorkerLifecycleState::*;
        assert!(Stopped.can_transition_to(Initializing));
        assert!(Initializing.can_transition_to(Running));
        assert!(Running.can_transition_to(Degraded));
        assert!(Degraded.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
    }

    #[test]
    fn test_lifecycle_illegal_transitions() {
        use WorkerLifecycleState::*;
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Running.can_transition_to(Stopped));
        assert!(!Stopping.can_transition_to(Running));
        assert!(!Degraded.can_transition_to(Stopped));
    }
}
