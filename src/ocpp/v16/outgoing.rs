//! OCPP 1.6 requests the station sends, and the typed responses it
//! expects back — spec.md §4.2 "Actions covered (1.6, both directions)".
//!
//! Grounded action-by-action on the teacher's `application/charging/
//! handlers/ocpp_v16/*` and `application/handlers/ocpp_v16/*` (which parse
//! these same `rust_ocpp::v1_6::messages::*` request types on the CSMS
//! side); here the station is the one building the request and parsing
//! the response, the reverse of the teacher's direction.

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
use rust_ocpp::v1_6::messages::boot_notification::{BootNotificationRequest, BootNotificationResponse};
use rust_ocpp::v1_6::messages::data_transfer::{DataTransferRequest, DataTransferResponse};
use rust_ocpp::v1_6::messages::diagnostics_status_notification::{
    DiagnosticsStatusNotificationRequest, DiagnosticsStatusNotificationResponse,
};
use rust_ocpp::v1_6::messages::firmware_status_notification::{
    FirmwareStatusNotificationRequest, FirmwareStatusNotificationResponse,
};
use rust_ocpp::v1_6::messages::heart_beat::HeartbeatResponse;
use rust_ocpp::v1_6::messages::meter_values::{MeterValuesRequest, MeterValuesResponse};
use rust_ocpp::v1_6::messages::start_transaction::{StartTransactionRequest, StartTransactionResponse};
use rust_ocpp::v1_6::messages::status_notification::{StatusNotificationRequest, StatusNotificationResponse};
use rust_ocpp::v1_6::messages::stop_transaction::{StopTransactionRequest, StopTransactionResponse};
use rust_ocpp::v1_6::types::{
    ChargePointErrorCode, ChargePointStatus, DataTransferStatus, DiagnosticsStatus, FirmwareStatus, MeterValue,
};
use serde_json::Value;

use crate::error::StationError;

fn to_value<T: serde::Serialize>(request: &T) -> Result<Value, StationError> {
    serde_json::to_value(request).map_err(StationError::from)
}

fn from_value<T: serde::de::DeserializeOwned>(action: &str, payload: Value) -> Result<T, StationError> {
    serde_json::from_value(payload).map_err(|e| StationError::Protocol(format!("malformed {action} response: {e}")))
}

pub const ACTION_BOOT_NOTIFICATION: &str = "BootNotification";
pub const ACTION_HEARTBEAT: &str = "Heartbeat";
pub const ACTION_AUTHORIZE: &str = "Authorize";
pub const ACTION_START_TRANSACTION: &str = "StartTransaction";
pub const ACTION_STOP_TRANSACTION: &str = "StopTransaction";
pub const ACTION_STATUS_NOTIFICATION: &str = "StatusNotification";
pub const ACTION_METER_VALUES: &str = "MeterValues";
pub const ACTION_DATA_TRANSFER: &str = "DataTransfer";
pub const ACTION_DIAGNOSTICS_STATUS_NOTIFICATION: &str = "DiagnosticsStatusNotification";
pub const ACTION_FIRMWARE_STATUS_NOTIFICATION: &str = "FirmwareStatusNotification";

pub fn build_boot_notification(
    charge_point_vendor: &str,
    charge_point_model: &str,
    charge_point_serial_number: Option<&str>,
    firmware_version: Option<&str>,
) -> Result<Value, StationError> {
    to_value(&BootNotificationRequest {
        charge_point_vendor: charge_point_vendor.to_string(),
        charge_point_model: charge_point_model.to_string(),
        charge_point_serial_number: charge_point_serial_number.map(str::to_string),
        charge_box_serial_number: None,
        firmware_version: firmware_version.map(str::to_string),
        iccid: None,
        imsi: None,
        meter_serial_number: None,
        meter_type: None,
    })
}

pub fn parse_boot_notification_response(payload: Value) -> Result<BootNotificationResponse, StationError> {
    from_value(ACTION_BOOT_NOTIFICATION, payload)
}

pub fn build_heartbeat() -> Value {
    serde_json::json!({})
}

pub fn parse_heartbeat_response(payload: Value) -> Result<HeartbeatResponse, StationError> {
    from_value(ACTION_HEARTBEAT, payload)
}

pub fn build_authorize(id_tag: &str) -> Result<Value, StationError> {
    to_value(&AuthorizeRequest { id_tag: id_tag.to_string() })
}

pub fn parse_authorize_response(payload: Value) -> Result<AuthorizeResponse, StationError> {
    from_value(ACTION_AUTHORIZE, payload)
}

pub fn build_start_transaction(
    connector_id: u32,
    id_tag: &str,
    meter_start: i32,
    timestamp: DateTime<Utc>,
    reservation_id: Option<i32>,
) -> Result<Value, StationError> {
    to_value(&StartTransactionRequest {
        connector_id,
        id_tag: id_tag.to_string(),
        meter_start,
        timestamp,
        reservation_id,
    })
}

pub fn parse_start_transaction_response(payload: Value) -> Result<StartTransactionResponse, StationError> {
    from_value(ACTION_START_TRANSACTION, payload)
}

pub fn build_stop_transaction(
    transaction_id: i32,
    meter_stop: i32,
    timestamp: DateTime<Utc>,
    reason: Option<rust_ocpp::v1_6::types::Reason>,
    id_tag: Option<&str>,
    transaction_data: Option<Vec<MeterValue>>,
) -> Result<Value, StationError> {
    to_value(&StopTransactionRequest {
        transaction_id,
        meter_stop,
        timestamp,
        reason,
        id_tag: id_tag.map(str::to_string),
        transaction_data,
    })
}

pub fn parse_stop_transaction_response(payload: Value) -> Result<StopTransactionResponse, StationError> {
    from_value(ACTION_STOP_TRANSACTION, payload)
}

pub fn build_status_notification(
    connector_id: u32,
    status: ChargePointStatus,
    error_code: ChargePointErrorCode,
    info: Option<&str>,
    timestamp: Option<DateTime<Utc>>,
) -> Result<Value, StationError> {
    to_value(&StatusNotificationRequest {
        connector_id,
        status,
        error_code,
        info: info.map(str::to_string),
        timestamp,
        vendor_id: None,
        vendor_error_code: None,
    })
}

pub fn parse_status_notification_response(payload: Value) -> Result<StatusNotificationResponse, StationError> {
    from_value(ACTION_STATUS_NOTIFICATION, payload)
}

pub fn build_meter_values(connector_id: u32, transaction_id: Option<i32>, meter_value: Vec<MeterValue>) -> Result<Value, StationError> {
    to_value(&MeterValuesRequest {
        connector_id,
        transaction_id,
        meter_value,
    })
}

pub fn parse_meter_values_response(payload: Value) -> Result<MeterValuesResponse, StationError> {
    from_value(ACTION_METER_VALUES, payload)
}

pub fn build_data_transfer(vendor_id: &str, message_id: Option<&str>, data: Option<&str>) -> Result<Value, StationError> {
    to_value(&DataTransferRequest {
        vendor_string: vendor_id.to_string(),
        message_id: message_id.map(str::to_string),
        data: data.map(str::to_string),
    })
}

pub fn parse_data_transfer_response(payload: Value) -> Result<DataTransferResponse, StationError> {
    from_value(ACTION_DATA_TRANSFER, payload)
}

pub fn build_diagnostics_status_notification(status: DiagnosticsStatus) -> Result<Value, StationError> {
    to_value(&DiagnosticsStatusNotificationRequest { status })
}

pub fn parse_diagnostics_status_notification_response(
    payload: Value,
) -> Result<DiagnosticsStatusNotificationResponse, StationError> {
    from_value(ACTION_DIAGNOSTICS_STATUS_NOTIFICATION, payload)
}

pub fn build_firmware_status_notification(status: FirmwareStatus) -> Result<Value, StationError> {
    to_value(&FirmwareStatusNotificationRequest { status })
}

pub fn parse_firmware_status_notification_response(
    payload: Value,
) -> Result<FirmwareStatusNotificationResponse, StationError> {
    from_value(ACTION_FIRMWARE_STATUS_NOTIFICATION, payload)
}

/// Data-transfer status is accepted/unknown — the only two cases that
/// matter when the engine just wants a boolean, per spec.md §4.2.
pub fn data_transfer_accepted(status: DataTransferStatus) -> bool {
    matches!(status, DataTransferStatus::Accepted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_notification_round_trips_through_json() {
        let payload = build_boot_notification("Acme", "X1", Some("SN-1"), Some("1.0.0")).unwrap();
        assert_eq!(payload["chargePointVendor"], "Acme");
        assert_eq!(payload["chargePointModel"], "X1");
    }

    #[test]
    fn parse_boot_notification_response_rejects_malformed_payload() {
        let err = parse_boot_notification_response(serde_json::json!({"status": "not-a-status"})).unwrap_err();
        assert!(matches!(err, StationError::Protocol(_)));
    }

    #[test]
    fn heartbeat_has_no_fields() {
        assert_eq!(build_heartbeat(), serde_json::json!({}));
    }
}
