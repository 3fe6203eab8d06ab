//! Fleet-wide station registry and the single ControlBus dispatcher, per
//! spec.md §4.4 / §4.5.
//!
//! `ControlBus::request_and_aggregate` needs the full set of known station
//! hash ids to resolve "no `hashIds` means every station" fan-out; every
//! `WorkerHost` registers the stations it spawns here rather than each
//! keeping its own bookkeeping. Dispatch of incoming `ControlRequest`s is
//! likewise centralized in one subscriber task here instead of one per
//! `WorkerHost`, since every host would otherwise see and process the same
//! broadcast message redundantly.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use rust_ocpp::v1_6::types::FirmwareStatus;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use crate::control_bus::{ControlRequest, ControlRequestPayload, Procedure, SharedControlBus, StationReply};
use crate::domain::connector::ConnectorStatusV16;
use crate::domain::reservation::Reservation;
use crate::engine::{Atg, EngineCommand, EngineHandle};
use crate::error::StationError;

/// One running station, as known to the fleet: its command handle, its ATG,
/// and the connector ids it was built with (captured once at spawn time,
/// since `EngineHandle` itself exposes no way to ask the live engine for
/// its topology).
#[derive(Clone)]
pub struct StationUnit {
    pub charging_station_id: String,
    pub handle: EngineHandle,
    pub atg: Arc<Atg>,
    pub connector_ids: Vec<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StationSummary {
    pub hash_id: String,
    pub charging_station_id: String,
    pub connector_ids: Vec<u32>,
}

/// Every running station, keyed by `hashId`, shared across every
/// `WorkerHost` the supervisor spawns.
pub struct FleetRegistry {
    stations: DashMap<String, StationUnit>,
    control_bus: SharedControlBus,
}

pub type SharedFleetRegistry = Arc<FleetRegistry>;

impl FleetRegistry {
    pub fn new(control_bus: SharedControlBus) -> Self {
        Self {
            stations: DashMap::new(),
            control_bus,
        }
    }

    pub fn shared(control_bus: SharedControlBus) -> SharedFleetRegistry {
        Arc::new(Self::new(control_bus))
    }

    pub fn register(&self, unit: StationUnit) {
        self.stations.insert(unit.handle.hash_id.clone(), unit);
    }

    pub fn remove(&self, hash_id: &str) -> Option<StationUnit> {
        self.stations.remove(hash_id).map(|(_, unit)| unit)
    }

    pub fn hash_ids(&self) -> HashSet<String> {
        self.stations.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn get(&self, hash_id: &str) -> Option<StationUnit> {
        self.stations.get(hash_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    /// Every registered station, for `Supervisor::stop()`'s full-fleet
    /// shutdown sweep.
    pub fn all(&self) -> Vec<StationUnit> {
        self.stations.iter().map(|entry| entry.value().clone()).collect()
    }

    /// `LIST_CHARGING_STATIONS`, handled UIServer-local and never published
    /// on the bus (spec.md §4.5).
    pub fn summaries(&self) -> Vec<StationSummary> {
        self.stations
            .iter()
            .map(|entry| {
                let unit = entry.value();
                StationSummary {
                    hash_id: entry.key().clone(),
                    charging_station_id: unit.charging_station_id.clone(),
                    connector_ids: unit.connector_ids.clone(),
                }
            })
            .collect()
    }

    /// Subscribe to the control bus once and dispatch every request to its
    /// targeted stations, one spawned task per target so a slow station
    /// never delays another's reply.
    pub fn spawn_control_loop(self: &Arc<Self>) {
        let registry = self.clone();
        let mut rx = self.control_bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(request) => registry.dispatch(request),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "fleet control loop lagged behind the control bus, dropping backlog");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });
    }

    fn dispatch(self: &Arc<Self>, request: ControlRequest) {
        if request.procedure.is_ui_server_local() {
            return;
        }
        let targets = request.payload.target_hash_ids();
        let target_set: Vec<String> = if targets.is_empty() { self.hash_ids().into_iter().collect() } else { targets };

        for hash_id in target_set {
            let Some(unit) = self.get(&hash_id) else { continue };
            let registry = self.clone();
            let procedure = request.procedure;
            let payload = request.payload.clone();
            let uuid = request.uuid;
            tokio::spawn(async move {
                let reply = apply_procedure(&unit, procedure, &payload).await;
                registry.control_bus.reply(uuid, reply);
            });
        }
    }
}

/// Translate one fanned-out `ControlRequest` into the matching
/// `EngineCommand`/`Atg` call against a single targeted station, replying
/// with its outcome.
async fn apply_procedure(unit: &StationUnit, procedure: Procedure, payload: &ControlRequestPayload) -> StationReply {
    let hash_id = unit.handle.hash_id.clone();
    let command_name = format!("{procedure:?}");

    let result = match procedure {
        Procedure::StartSimulator | Procedure::StopSimulator => Ok(()),
        Procedure::ListChargingStations => unreachable!("filtered out before dispatch"),

        Procedure::StartChargingStation | Procedure::OpenConnection => unit.handle.send(EngineCommand::Start).await,
        Procedure::StopChargingStation | Procedure::CloseConnection => {
            let reason = extra_str(payload, "reason").unwrap_or_else(|| "closeConnection".to_string());
            unit.handle.send(EngineCommand::Stop { reason }).await
        }

        Procedure::StartTransaction => match (extra_u32(payload, "connectorId"), extra_str(payload, "idTag")) {
            (Some(connector_id), Some(id_tag)) => unit.handle.send(EngineCommand::StartTransaction { connector_id, id_tag }).await,
            _ => Err(StationError::Validation {
                action: command_name.clone(),
                detail: "connectorId and idTag are required".to_string(),
            }),
        },
        Procedure::StopTransaction => match extra_u32(payload, "connectorId") {
            Some(connector_id) => {
                let reason = extra_str(payload, "reason").unwrap_or_else(|| "Local".to_string());
                unit.handle.send(EngineCommand::StopTransaction { connector_id, reason }).await
            }
            None => Err(StationError::Validation {
                action: command_name.clone(),
                detail: "connectorId is required".to_string(),
            }),
        },

        Procedure::StartAutomaticTransactionGenerator => {
            let requested = extra_vec_u32(payload, "connectorIds");
            let ids = if requested.is_empty() { unit.connector_ids.clone() } else { requested };
            unit.atg.start(&ids);
            Ok(())
        }
        Procedure::StopAutomaticTransactionGenerator => {
            let requested = extra_vec_u32(payload, "connectorIds");
            if requested.is_empty() {
                unit.atg.stop(None);
            } else {
                unit.atg.stop(Some(&requested));
            }
            Ok(())
        }

        Procedure::SetSupervisionUrl => {
            let urls = extra_vec_string(payload, "supervisionUrls");
            let urls = if urls.is_empty() {
                extra_str(payload, "supervisionUrl").into_iter().collect()
            } else {
                urls
            };
            unit.handle.send(EngineCommand::SetSupervisionUrls { urls }).await
        }

        Procedure::UpdateStatus => match (extra_u32(payload, "connectorId"), extra_str(payload, "status")) {
            (Some(connector_id), Some(status)) => match ConnectorStatusV16::parse(&status) {
                Some(status) => unit.handle.send(EngineCommand::SetStatus { connector_id, status }).await,
                None => Err(StationError::Validation {
                    action: command_name.clone(),
                    detail: format!("unknown connector status {status}"),
                }),
            },
            _ => Err(StationError::Validation {
                action: command_name.clone(),
                detail: "connectorId and status are required".to_string(),
            }),
        },
        Procedure::UpdateFirmwareStatus => match extra_str(payload, "status") {
            Some(status) => match parse_firmware_status(&status) {
                Some(status) => unit.handle.send(EngineCommand::SetFirmwareStatus { status }).await,
                None => Err(StationError::Validation {
                    action: command_name.clone(),
                    detail: format!("unknown firmware status {status}"),
                }),
            },
            None => Err(StationError::Validation {
                action: command_name.clone(),
                detail: "status is required".to_string(),
            }),
        },

        Procedure::Authorize => match extra_str(payload, "idTag") {
            Some(id_tag) => unit.handle.send(EngineCommand::Authorize { id_tag }).await,
            None => Err(StationError::Validation {
                action: command_name.clone(),
                detail: "idTag is required".to_string(),
            }),
        },
        Procedure::DataTransfer => match extra_str(payload, "vendorId") {
            Some(vendor_id) => {
                let message_id = extra_str(payload, "messageId");
                let data = extra_str(payload, "data");
                unit.handle.send(EngineCommand::DataTransfer { vendor_id, message_id, data }).await
            }
            None => Err(StationError::Validation {
                action: command_name.clone(),
                detail: "vendorId is required".to_string(),
            }),
        },

        Procedure::Heartbeat => {
            unit.handle
                .send(EngineCommand::Trigger { message: crate::ocpp::TriggerMessageKind::Heartbeat, connector_id: None })
                .await
        }
        Procedure::MeterValues => {
            unit.handle
                .send(EngineCommand::Trigger {
                    message: crate::ocpp::TriggerMessageKind::MeterValues,
                    connector_id: extra_u32(payload, "connectorId"),
                })
                .await
        }
        Procedure::StatusNotification => {
            unit.handle
                .send(EngineCommand::Trigger {
                    message: crate::ocpp::TriggerMessageKind::StatusNotification,
                    connector_id: extra_u32(payload, "connectorId"),
                })
                .await
        }
        Procedure::BootNotification => {
            unit.handle
                .send(EngineCommand::Trigger { message: crate::ocpp::TriggerMessageKind::BootNotification, connector_id: None })
                .await
        }
        Procedure::DiagnosticsStatusNotification => {
            unit.handle
                .send(EngineCommand::Trigger {
                    message: crate::ocpp::TriggerMessageKind::DiagnosticsStatusNotification,
                    connector_id: None,
                })
                .await
        }
        Procedure::FirmwareStatusNotification => {
            unit.handle
                .send(EngineCommand::Trigger {
                    message: crate::ocpp::TriggerMessageKind::FirmwareStatusNotification,
                    connector_id: None,
                })
                .await
        }
    };

    match result {
        Ok(()) => StationReply::success(hash_id),
        Err(err) => StationReply::failure(hash_id, command_name, err.to_string()),
    }
}

/// `ADD_RESERVATION`/`REMOVE_RESERVATION` are reached through the same
/// `EngineCommand` the reservation-management CALLs use, but spec.md §4.5
/// doesn't list a control-bus procedure for them: reservations are only
/// ever created by the CSMS over OCPP, never by the UI. Kept here as a
/// helper so a future UI-facing procedure can reuse it without touching
/// `apply_procedure`'s match.
#[allow(dead_code)]
async fn add_reservation(unit: &StationUnit, reservation: Reservation) -> Result<(), StationError> {
    unit.handle.send(EngineCommand::AddReservation(reservation)).await
}

fn extra_str(payload: &ControlRequestPayload, key: &str) -> Option<String> {
    payload.extra.get(key).and_then(Value::as_str).map(str::to_string)
}

fn extra_u32(payload: &ControlRequestPayload, key: &str) -> Option<u32> {
    payload.extra.get(key).and_then(Value::as_u64).map(|n| n as u32)
}

fn extra_vec_u32(payload: &ControlRequestPayload, key: &str) -> Vec<u32> {
    payload
        .extra
        .get(key)
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_u64).map(|n| n as u32).collect())
        .unwrap_or_default()
}

fn extra_vec_string(payload: &ControlRequestPayload, key: &str) -> Vec<String> {
    payload
        .extra
        .get(key)
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default()
}

/// String vocabulary matches `rust_ocpp::v1_6::types::FirmwareStatus`'s
/// wire representation, following the same plain `match` the incoming
/// `TriggerMessage` handler uses for its requested-message vocabulary.
fn parse_firmware_status(raw: &str) -> Option<FirmwareStatus> {
    match raw {
        "Downloaded" => Some(FirmwareStatus::Downloaded),
        "DownloadFailed" => Some(FirmwareStatus::DownloadFailed),
        "Downloading" => Some(FirmwareStatus::Downloading),
        "Idle" => Some(FirmwareStatus::Idle),
        "InstallationFailed" => Some(FirmwareStatus::InstallationFailed),
        "Installing" => Some(FirmwareStatus::Installing),
        "Installed" => Some(FirmwareStatus::Installed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_firmware_statuses() {
        assert!(matches!(parse_firmware_status("Installed"), Some(FirmwareStatus::Installed)));
        assert!(parse_firmware_status("NotAStatus").is_none());
    }

    #[test]
    fn extra_helpers_read_flattened_payload_fields() {
        let payload = ControlRequestPayload {
            hash_ids: Vec::new(),
            hash_id: None,
            extra: serde_json::json!({ "connectorId": 3, "idTag": "TAG-1", "connectorIds": [1, 2] }),
        };
        assert_eq!(extra_u32(&payload, "connectorId"), Some(3));
        assert_eq!(extra_str(&payload, "idTag"), Some("TAG-1".to_string()));
        assert_eq!(extra_vec_u32(&payload, "connectorIds"), vec![1, 2]);
    }
}
