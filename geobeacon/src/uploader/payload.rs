//! Collector wire format.
//!
//! The collector expects a flat JSON object with stable field names.
//! Optional string fields serialize as empty strings, never as `null` and
//! never omitted - the collector treats key presence as schema.

use serde::Serialize;

use crate::fix::LocationFix;

/// Wall-clock timestamp format used on the wire.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One fix, serialized for the collector.
///
/// Field names are part of the wire contract; do not rename.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixPayload {
    pub timestamp: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f32,
    pub address: String,
    pub country: String,
    pub province: String,
    pub city: String,
    pub district: String,
    pub street: String,
    pub street_num: String,
    pub city_code: String,
    pub ad_code: String,
    pub poi_name: String,
    pub aoi_name: String,
    pub building_id: String,
    pub floor: String,
    pub gps_accuracy_status: i32,
    pub location_type: i32,
    pub speed: f32,
    pub bearing: f32,
    pub altitude: f64,
    pub error_code: i32,
    pub error_info: String,
    pub user_name: String,
}

impl FixPayload {
    /// Build the wire payload for a fix, attaching the configured user.
    pub fn from_fix(fix: &LocationFix, user_name: &str) -> Self {
        Self {
            timestamp: fix.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy: fix.accuracy,
            address: fix.address.clone(),
            country: fix.country.clone(),
            province: fix.province.clone(),
            city: fix.city.clone(),
            district: fix.district.clone(),
            street: fix.street.clone(),
            street_num: fix.street_num.clone(),
            city_code: fix.city_code.clone(),
            ad_code: fix.ad_code.clone(),
            poi_name: fix.poi_name.clone(),
            aoi_name: fix.aoi_name.clone(),
            building_id: fix.building_id.clone(),
            floor: fix.floor.clone(),
            gps_accuracy_status: fix.gps_accuracy_status,
            location_type: fix.location_type,
            speed: fix.speed,
            bearing: fix.bearing,
            altitude: fix.altitude,
            error_code: fix.error_code,
            error_info: fix.error_info.clone(),
            user_name: user_name.to_string(),
        }
    }
}
