//! OCPP 1.6 requests the station receives from the CSMS and must answer,
//! per spec.md §4.2's incoming action list.
//!
//! Parsed and answered against raw `serde_json::Value` rather than typed
//! `rust_ocpp` request/response structs: the station only needs to read a
//! handful of fields off each incoming call and echo back a small status
//! object, and the wire-level field names are exactly what spec.md's
//! GLOSSARY and the teacher's handlers already key off (`connectorId`,
//! `idTag`, `key`, ...). Building *outgoing* requests (`outgoing.rs`) uses
//! the typed `rust_ocpp` structs because there we control every field and
//! get schema-shaped construction for free.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::domain::connector::{Availability, ChargingProfile};
use crate::domain::reservation::{Reservation, ReservationStatus};
use crate::domain::station::Station;
use crate::error::StationError;
use crate::ocpp::{EngineAction, IncomingOutcome, ResetKind, TriggerMessageKind};

fn missing_field(action: &str, field: &str) -> StationError {
    StationError::Validation {
        action: action.to_string(),
        detail: format!("missing or malformed field `{field}`"),
    }
}

pub fn handle(station: &mut Station, action: &str, payload: Value) -> Result<IncomingOutcome, StationError> {
    match action {
        "Reset" => reset(&payload),
        "ClearCache" => Ok(IncomingOutcome::response_only(json!({ "status": "Accepted" }))),
        "ChangeAvailability" => change_availability(station, &payload),
        "UnlockConnector" => unlock_connector(station, &payload),
        "GetConfiguration" => get_configuration(station, &payload),
        "ChangeConfiguration" => change_configuration(station, &payload),
        "GetCompositeSchedule" => Ok(IncomingOutcome::response_only(json!({ "status": "Rejected" }))),
        "SetChargingProfile" => set_charging_profile(station, &payload),
        "ClearChargingProfile" => clear_charging_profile(station, &payload),
        "RemoteStartTransaction" => remote_start_transaction(station, &payload),
        "RemoteStopTransaction" => remote_stop_transaction(station, &payload),
        "GetDiagnostics" => get_diagnostics(&payload),
        "TriggerMessage" => trigger_message(&payload),
        "DataTransfer" => Ok(IncomingOutcome::response_only(json!({ "status": "Accepted" }))),
        "UpdateFirmware" => update_firmware(&payload),
        "ReserveNow" => reserve_now(station, &payload),
        "CancelReservation" => cancel_reservation(station, &payload),
        other => Err(StationError::Protocol(format!("unsupported incoming action: {other}"))),
    }
}

fn reset(payload: &Value) -> Result<IncomingOutcome, StationError> {
    let kind = match payload.get("type").and_then(Value::as_str) {
        Some("Hard") => ResetKind::Hard,
        Some("Soft") => ResetKind::Soft,
        _ => return Err(missing_field("Reset", "type")),
    };
    Ok(IncomingOutcome::with_action(json!({ "status": "Accepted" }), EngineAction::Reset { kind }))
}

fn change_availability(station: &mut Station, payload: &Value) -> Result<IncomingOutcome, StationError> {
    let connector_id = payload
        .get("connectorId")
        .and_then(Value::as_u64)
        .ok_or_else(|| missing_field("ChangeAvailability", "connectorId"))? as u32;
    let inoperative = match payload.get("type").and_then(Value::as_str) {
        Some("Inoperative") => true,
        Some("Operative") => false,
        _ => return Err(missing_field("ChangeAvailability", "type")),
    };

    let targets: Vec<u32> = if connector_id == 0 {
        station.topology.flat_connector_ids()
    } else {
        vec![connector_id]
    };
    if targets.is_empty() || (connector_id != 0 && station.topology.connector(connector_id).is_none()) {
        return Ok(IncomingOutcome::response_only(json!({ "status": "Rejected" })));
    }

    let any_mid_transaction = targets
        .iter()
        .filter_map(|&id| station.topology.connector(id))
        .any(|c| c.transaction_started);

    let new_availability = if inoperative { Availability::Inoperative } else { Availability::Operative };
    if any_mid_transaction {
        // Deferred: applied once the transaction(s) finish, per OCPP 1.6 semantics.
        return Ok(IncomingOutcome::response_only(json!({ "status": "Scheduled" })));
    }
    for id in targets {
        if let Some(connector) = station.topology.connector_mut(id) {
            connector.availability = new_availability;
        }
    }
    Ok(IncomingOutcome::response_only(json!({ "status": "Accepted" })))
}

fn unlock_connector(station: &mut Station, payload: &Value) -> Result<IncomingOutcome, StationError> {
    let connector_id = payload
        .get("connectorId")
        .and_then(Value::as_u64)
        .ok_or_else(|| missing_field("UnlockConnector", "connectorId"))? as u32;
    let status = if station.topology.connector(connector_id).is_some() {
        "Unlocked"
    } else {
        "NotSupported"
    };
    Ok(IncomingOutcome::response_only(json!({ "status": status })))
}

fn get_configuration(station: &Station, payload: &Value) -> Result<IncomingOutcome, StationError> {
    let requested: Option<Vec<String>> = payload
        .get("key")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect());

    let (configuration_key, unknown_key): (Vec<Value>, Vec<String>) = match requested {
        None => (
            station
                .config_keys
                .iter()
                .filter(|k| k.visible)
                .map(|k| json!({ "key": k.key, "readonly": k.readonly, "value": k.value }))
                .collect(),
            Vec::new(),
        ),
        Some(keys) => {
            let mut found = Vec::new();
            let mut unknown = Vec::new();
            for key in keys {
                match station.config_keys.get(&key) {
                    Some(entry) => found.push(json!({ "key": entry.key, "readonly": entry.readonly, "value": entry.value })),
                    None => unknown.push(key),
                }
            }
            (found, unknown)
        }
    };

    Ok(IncomingOutcome::response_only(json!({
        "configurationKey": configuration_key,
        "unknownKey": unknown_key,
    })))
}

fn change_configuration(station: &mut Station, payload: &Value) -> Result<IncomingOutcome, StationError> {
    let key = payload
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| missing_field("ChangeConfiguration", "key"))?;
    let value = payload
        .get("value")
        .and_then(Value::as_str)
        .ok_or_else(|| missing_field("ChangeConfiguration", "value"))?;

    let status = match station.config_keys.get(key) {
        None => "NotSupported",
        Some(entry) if entry.readonly => "Rejected",
        Some(_) => {
            let reboot = station.config_keys.get(key).map(|e| e.reboot).unwrap_or(false);
            let entry = crate::domain::config_keys::ConfigurationKey::new(key, value);
            let entry = if reboot { entry.needs_reboot() } else { entry };
            station.config_keys.set(entry, true);
            if reboot {
                "RebootRequired"
            } else {
                "Accepted"
            }
        }
    };
    Ok(IncomingOutcome::response_only(json!({ "status": status })))
}

fn set_charging_profile(station: &mut Station, payload: &Value) -> Result<IncomingOutcome, StationError> {
    let connector_id = payload
        .get("connectorId")
        .and_then(Value::as_u64)
        .ok_or_else(|| missing_field("SetChargingProfile", "connectorId"))? as u32;
    let profile = payload
        .get("csChargingProfiles")
        .ok_or_else(|| missing_field("SetChargingProfile", "csChargingProfiles"))?;
    let profile_id = profile.get("chargingProfileId").and_then(Value::as_i64).unwrap_or(0) as i32;
    let stack_level = profile.get("stackLevel").and_then(Value::as_i64).unwrap_or(0) as i32;

    let targets: Vec<u32> = if connector_id == 0 {
        station.topology.flat_connector_ids()
    } else {
        vec![connector_id]
    };
    for id in &targets {
        if let Some(connector) = station.topology.connector_mut(*id) {
            connector.charging_profiles.push(ChargingProfile {
                charging_profile_id: profile_id,
                stack_level,
                raw: profile.clone(),
            });
        }
    }
    let status = if targets.is_empty() { "NotSupported" } else { "Accepted" };
    Ok(IncomingOutcome::response_only(json!({ "status": status })))
}

fn clear_charging_profile(station: &mut Station, payload: &Value) -> Result<IncomingOutcome, StationError> {
    let id = payload.get("id").and_then(Value::as_i64).map(|v| v as i32);
    let connector_id = payload.get("connectorId").and_then(Value::as_u64).map(|v| v as u32);
    let stack_level = payload.get("stackLevel").and_then(Value::as_i64).map(|v| v as i32);

    let targets: Vec<u32> = match connector_id {
        Some(0) | None => station.topology.flat_connector_ids(),
        Some(cid) => vec![cid],
    };
    for cid in targets {
        if let Some(connector) = station.topology.connector_mut(cid) {
            connector.charging_profiles.retain(|p| {
                let id_matches = id.map(|wanted| p.charging_profile_id == wanted).unwrap_or(true);
                let stack_matches = stack_level.map(|wanted| p.stack_level == wanted).unwrap_or(true);
                !(id_matches && stack_matches)
            });
        }
    }
    Ok(IncomingOutcome::response_only(json!({ "status": "Accepted" })))
}

fn remote_start_transaction(station: &mut Station, payload: &Value) -> Result<IncomingOutcome, StationError> {
    let id_tag = payload
        .get("idTag")
        .and_then(Value::as_str)
        .ok_or_else(|| missing_field("RemoteStartTransaction", "idTag"))?
        .to_string();
    let connector_id = payload.get("connectorId").and_then(Value::as_u64).map(|v| v as u32);

    let accepted = match connector_id {
        Some(id) => station.topology.connector(id).map(|c| c.is_available_for_start()).unwrap_or(false),
        None => station.topology.flat_connector_ids().iter().any(|&id| {
            station.topology.connector(id).map(|c| c.is_available_for_start()).unwrap_or(false)
        }),
    };

    if !accepted {
        return Ok(IncomingOutcome::response_only(json!({ "status": "Rejected" })));
    }
    Ok(IncomingOutcome::with_action(
        json!({ "status": "Accepted" }),
        EngineAction::RemoteStartTransaction { connector_id, id_tag },
    ))
}

fn remote_stop_transaction(station: &Station, payload: &Value) -> Result<IncomingOutcome, StationError> {
    let transaction_id = payload
        .get("transactionId")
        .and_then(Value::as_i64)
        .ok_or_else(|| missing_field("RemoteStopTransaction", "transactionId"))? as i32;

    let exists = station
        .topology
        .flat_connector_ids()
        .iter()
        .filter_map(|&id| station.topology.connector(id))
        .any(|c| c.transaction_id == Some(transaction_id));

    if !exists {
        return Ok(IncomingOutcome::response_only(json!({ "status": "Rejected" })));
    }
    Ok(IncomingOutcome::with_action(
        json!({ "status": "Accepted" }),
        EngineAction::RemoteStopTransaction { transaction_id },
    ))
}

fn get_diagnostics(payload: &Value) -> Result<IncomingOutcome, StationError> {
    let location = payload
        .get("location")
        .and_then(Value::as_str)
        .ok_or_else(|| missing_field("GetDiagnostics", "location"))?
        .to_string();
    let file_name = format!("diagnostics-{}.zip", Utc::now().format("%Y%m%d%H%M%S"));
    Ok(IncomingOutcome::with_action(
        json!({ "fileName": file_name }),
        EngineAction::GetDiagnostics { location },
    ))
}

fn trigger_message(payload: &Value) -> Result<IncomingOutcome, StationError> {
    let requested = payload
        .get("requestedMessage")
        .and_then(Value::as_str)
        .ok_or_else(|| missing_field("TriggerMessage", "requestedMessage"))?;
    let message = match requested {
        "BootNotification" => TriggerMessageKind::BootNotification,
        "DiagnosticsStatusNotification" => TriggerMessageKind::DiagnosticsStatusNotification,
        "FirmwareStatusNotification" => TriggerMessageKind::FirmwareStatusNotification,
        "Heartbeat" => TriggerMessageKind::Heartbeat,
        "MeterValues" => TriggerMessageKind::MeterValues,
        "StatusNotification" => TriggerMessageKind::StatusNotification,
        _ => return Ok(IncomingOutcome::response_only(json!({ "status": "NotImplemented" }))),
    };
    let connector_id = payload.get("connectorId").and_then(Value::as_u64).map(|v| v as u32);
    Ok(IncomingOutcome::with_action(
        json!({ "status": "Accepted" }),
        EngineAction::TriggerMessage { message, connector_id },
    ))
}

fn update_firmware(payload: &Value) -> Result<IncomingOutcome, StationError> {
    let location = payload
        .get("location")
        .and_then(Value::as_str)
        .ok_or_else(|| missing_field("UpdateFirmware", "location"))?
        .to_string();
    let retrieve_date: DateTime<Utc> = payload
        .get("retrieveDate")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| missing_field("UpdateFirmware", "retrieveDate"))?;
    Ok(IncomingOutcome::with_action(json!({}), EngineAction::UpdateFirmware { location, retrieve_date }))
}

fn reserve_now(station: &mut Station, payload: &Value) -> Result<IncomingOutcome, StationError> {
    let connector_id = payload
        .get("connectorId")
        .and_then(Value::as_u64)
        .ok_or_else(|| missing_field("ReserveNow", "connectorId"))? as u32;
    let id_tag = payload
        .get("idTag")
        .and_then(Value::as_str)
        .ok_or_else(|| missing_field("ReserveNow", "idTag"))?
        .to_string();
    let parent_id_tag = payload.get("parentIdTag").and_then(Value::as_str).map(str::to_string);
    let expiry_date: DateTime<Utc> = payload
        .get("expiryDate")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| missing_field("ReserveNow", "expiryDate"))?;
    let reservation_id = payload
        .get("reservationId")
        .and_then(Value::as_i64)
        .ok_or_else(|| missing_field("ReserveNow", "reservationId"))? as i32;

    let Some(connector) = station.topology.connector_mut(connector_id) else {
        return Ok(IncomingOutcome::response_only(json!({ "status": "Rejected" })));
    };
    if connector.transaction_started || connector.availability == Availability::Inoperative {
        return Ok(IncomingOutcome::response_only(json!({ "status": "Occupied" })));
    }
    connector.reservation = Some(Reservation {
        id: reservation_id,
        connector_id,
        id_tag,
        parent_id_tag,
        expiry_date,
        reservation_status: ReservationStatus::Accepted,
    });
    Ok(IncomingOutcome::response_only(json!({ "status": "Accepted" })))
}

fn cancel_reservation(station: &mut Station, payload: &Value) -> Result<IncomingOutcome, StationError> {
    let reservation_id = payload
        .get("reservationId")
        .and_then(Value::as_i64)
        .ok_or_else(|| missing_field("CancelReservation", "reservationId"))? as i32;

    let mut found = false;
    for id in station.topology.flat_connector_ids() {
        if let Some(connector) = station.topology.connector_mut(id) {
            if connector.reservation.as_ref().map(|r| r.id) == Some(reservation_id) {
                connector.reservation = None;
                found = true;
            }
        }
    }
    let status = if found { "Accepted" } else { "Rejected" };
    Ok(IncomingOutcome::response_only(json!({ "status": status })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config_keys::{ConfigurationKey, OcppConfigKeys};
    use crate::domain::connector::Connector;
    use crate::domain::evse::ConnectorTopology;
    use crate::domain::station::ElectricalProfile;
    use crate::domain::template::CurrentOutType;
    use crate::domain::version::OcppVersion;
    use std::collections::BTreeMap;

    fn test_station() -> Station {
        let mut connectors = BTreeMap::new();
        connectors.insert(1, Connector::new(1));
        connectors.insert(2, Connector::new(2));
        Station {
            hash_id: "h1".into(),
            charging_station_id: "CS-1".into(),
            index: 0,
            ocpp_version: OcppVersion::V16,
            template_path: "t.json".into(),
            template_hash: "abc".into(),
            electrical: ElectricalProfile {
                maximum_power_w: 22000.0,
                maximum_amperage_a: 32.0,
                voltage_out: 230.0,
                number_of_phases: 1,
                current_out_type: CurrentOutType::Ac,
                power_divider: 2,
                power_shared_by_connectors: false,
            },
            started: true,
            starting: false,
            stopping: false,
            boot_notification_response: None,
            heartbeat_interval_s: 60,
            firmware_status: None,
            config_keys: OcppConfigKeys::new(),
            topology: ConnectorTopology::Flat(connectors),
            auto_reconnect_retry_count: 0,
            ws_connection_restarted: false,
        }
    }

    #[test]
    fn reset_yields_engine_action() {
        let mut station = test_station();
        let outcome = handle(&mut station, "Reset", json!({"type": "Hard"})).unwrap();
        assert_eq!(outcome.response["status"], "Accepted");
        assert_eq!(outcome.engine_action, Some(EngineAction::Reset { kind: ResetKind::Hard }));
    }

    #[test]
    fn change_availability_unknown_connector_rejected() {
        let mut station = test_station();
        let outcome = handle(&mut station, "ChangeAvailability", json!({"connectorId": 99, "type": "Inoperative"})).unwrap();
        assert_eq!(outcome.response["status"], "Rejected");
    }

    #[test]
    fn change_availability_applies_when_idle() {
        let mut station = test_station();
        let outcome = handle(&mut station, "ChangeAvailability", json!({"connectorId": 1, "type": "Inoperative"})).unwrap();
        assert_eq!(outcome.response["status"], "Accepted");
        assert_eq!(station.topology.connector(1).unwrap().availability, Availability::Inoperative);
    }

    #[test]
    fn change_configuration_rejects_readonly_key() {
        let mut station = test_station();
        station.config_keys.set(ConfigurationKey::new("NumberOfConnectors", "2").readonly(true), true);
        let outcome = handle(&mut station, "ChangeConfiguration", json!({"key": "NumberOfConnectors", "value": "4"})).unwrap();
        assert_eq!(outcome.response["status"], "Rejected");
    }

    #[test]
    fn change_configuration_unknown_key_not_supported() {
        let mut station = test_station();
        let outcome = handle(&mut station, "ChangeConfiguration", json!({"key": "Bogus", "value": "1"})).unwrap();
        assert_eq!(outcome.response["status"], "NotSupported");
    }

    #[test]
    fn reserve_now_then_cancel_round_trip() {
        let mut station = test_station();
        let expiry = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        let outcome = handle(
            &mut station,
            "ReserveNow",
            json!({"connectorId": 1, "expiryDate": expiry, "idTag": "TAG-1", "reservationId": 7}),
        )
        .unwrap();
        assert_eq!(outcome.response["status"], "Accepted");
        assert!(station.topology.connector(1).unwrap().reservation.is_some());

        let cancel = handle(&mut station, "CancelReservation", json!({"reservationId": 7})).unwrap();
        assert_eq!(cancel.response["status"], "Accepted");
        assert!(station.topology.connector(1).unwrap().reservation.is_none());
    }

    #[test]
    fn remote_start_rejected_when_connector_busy() {
        let mut station = test_station();
        station.topology.connector_mut(1).unwrap().transaction_started = true;
        let outcome = handle(&mut station, "RemoteStartTransaction", json!({"idTag": "TAG-1", "connectorId": 1})).unwrap();
        assert_eq!(outcome.response["status"], "Rejected");
        assert!(outcome.engine_action.is_none());
    }
}
