//! OCPP 2.0.1 requests the station sends, per spec.md §4.2 "2.0 covered:
//! BootNotification, Heartbeat, StatusNotification (subset), Reset".
//!
//! Built as raw JSON rather than typed `rust_ocpp::v2_0_1` structs: the
//! teacher never exercises that side of the `rust-ocpp` crate (only
//! `v1_6`), so there is no grounded example of its exact field names for
//! this smaller action set. The wire shape here matches
//! `assets/schemas/v201.json`, which every payload is validated against
//! before being sent.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::error::StationError;

pub const ACTION_BOOT_NOTIFICATION: &str = "BootNotification";
pub const ACTION_HEARTBEAT: &str = "Heartbeat";
pub const ACTION_STATUS_NOTIFICATION: &str = "StatusNotification";

/// `BootReasonEnumType`, restricted to the values this engine ever sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootReason {
    PowerUp,
    RemoteReset,
    ScheduledReset,
}

impl BootReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::PowerUp => "PowerUp",
            Self::RemoteReset => "RemoteReset",
            Self::ScheduledReset => "ScheduledReset",
        }
    }
}

pub fn build_boot_notification(vendor_name: &str, model: &str, serial_number: Option<&str>, reason: BootReason) -> Value {
    let mut charging_station = json!({ "vendorName": vendor_name, "model": model });
    if let Some(serial) = serial_number {
        charging_station["serialNumber"] = json!(serial);
    }
    json!({ "chargingStation": charging_station, "reason": reason.as_str() })
}

pub fn parse_boot_notification_response(payload: Value) -> Result<Value, StationError> {
    if payload.get("status").and_then(Value::as_str).is_none() {
        return Err(StationError::Protocol("malformed BootNotification response: missing status".into()));
    }
    Ok(payload)
}

pub fn build_heartbeat() -> Value {
    json!({})
}

pub fn parse_heartbeat_response(payload: Value) -> Result<DateTime<Utc>, StationError> {
    payload
        .get("currentTime")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| StationError::Protocol("malformed Heartbeat response: missing currentTime".into()))
}

pub fn build_status_notification(connector_id: u32, evse_id: u32, status: &str, timestamp: DateTime<Utc>) -> Value {
    json!({
        "timestamp": timestamp.to_rfc3339(),
        "connectorStatus": status,
        "evseId": evse_id,
        "connectorId": connector_id,
    })
}

pub fn parse_status_notification_response(payload: Value) -> Result<Value, StationError> {
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_notification_has_required_fields() {
        let payload = build_boot_notification("Acme", "X1", None, BootReason::PowerUp);
        assert_eq!(payload["reason"], "PowerUp");
        assert_eq!(payload["chargingStation"]["vendorName"], "Acme");
    }

    #[test]
    fn heartbeat_response_requires_current_time() {
        let err = parse_heartbeat_response(json!({})).unwrap_err();
        assert!(matches!(err, StationError::Protocol(_)));
    }
}
