//! Control-plane message shapes, per spec.md §4.5.
//!
//! `[uuid, procedureName, payload]` requests and `[uuid, responsePayload]`
//! responses, carried over the same `broadcast`-based bus the teacher uses
//! for domain events (`application::events::EventBus`).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Every procedure name the control bus understands, per spec.md §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Procedure {
    StartSimulator,
    StopSimulator,
    ListChargingStations,
    StartChargingStation,
    StopChargingStation,
    OpenConnection,
    CloseConnection,
    StartTransaction,
    StopTransaction,
    StartAutomaticTransactionGenerator,
    StopAutomaticTransactionGenerator,
    SetSupervisionUrl,
    UpdateStatus,
    UpdateFirmwareStatus,
    Authorize,
    BootNotification,
    StatusNotification,
    Heartbeat,
    MeterValues,
    DataTransfer,
    DiagnosticsStatusNotification,
    FirmwareStatusNotification,
}

impl Procedure {
    /// Handled entirely within the UIServer, never published on the bus
    /// (spec.md §4.5: "LIST_CHARGING_STATIONS (UIServer-local)").
    pub fn is_ui_server_local(self) -> bool {
        matches!(self, Self::ListChargingStations)
    }
}

/// `SUCCESS` / `FAILURE` status carried on every control-plane response,
/// per spec.md §7 "User-visible failure".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlStatus {
    Success,
    Failure,
}

/// Request payload. `hash_ids` selects a target set; an empty/absent set
/// means "every connected station" (spec.md §4.5 Fan-out).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ControlRequestPayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hash_ids: Vec<String>,
    /// Deprecated single-target alias for `hash_ids`, per spec.md §4.5.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_id: Option<String>,
    #[serde(flatten)]
    pub extra: Value,
}

impl ControlRequestPayload {
    /// The effective target set, folding the deprecated singular `hashId`
    /// into `hashIds`.
    pub fn target_hash_ids(&self) -> Vec<String> {
        if !self.hash_ids.is_empty() {
            return self.hash_ids.clone();
        }
        if let Some(h) = &self.hash_id {
            return vec![h.clone()];
        }
        Vec::new()
    }
}

#[derive(Debug, Clone)]
pub struct ControlRequest {
    pub uuid: Uuid,
    pub procedure: Procedure,
    pub payload: ControlRequestPayload,
}

/// One station's answer to a fanned-out request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationReply {
    pub hash_id: String,
    pub status: ControlStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub request_payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_stack: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub error_details: Value,
}

impl StationReply {
    pub fn success(hash_id: impl Into<String>) -> Self {
        Self {
            hash_id: hash_id.into(),
            status: ControlStatus::Success,
            command: None,
            request_payload: Value::Null,
            error_message: None,
            error_stack: None,
            error_details: Value::Null,
        }
    }

    pub fn failure(hash_id: impl Into<String>, command: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            hash_id: hash_id.into(),
            status: ControlStatus::Failure,
            command: Some(command.into()),
            request_payload: Value::Null,
            error_message: Some(error_message.into()),
            error_stack: None,
            error_details: Value::Null,
        }
    }
}

/// Aggregated fan-out response built by the UIServer, per spec.md §4.5 and
/// §8 testable property ("total responses received equals k").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FanOutAggregate {
    pub status: String,
    pub hash_ids_succeeded: Vec<String>,
    pub hash_ids_failed: Vec<String>,
    pub responses_failed: Vec<StationReply>,
}

impl FanOutAggregate {
    /// Build the aggregate from however many replies actually arrived
    /// before the 120s fan-out timeout; any `expected` id with no reply
    /// counts as failed (spec.md §4.5).
    pub fn build(expected: &HashSet<String>, replies: Vec<StationReply>) -> Self {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut responses_failed = Vec::new();
        let mut seen = HashSet::new();

        for reply in replies {
            seen.insert(reply.hash_id.clone());
            match reply.status {
                ControlStatus::Success => succeeded.push(reply.hash_id.clone()),
                ControlStatus::Failure => {
                    failed.push(reply.hash_id.clone());
                    responses_failed.push(reply);
                }
            }
        }

        for missing in expected.difference(&seen) {
            failed.push(missing.clone());
            responses_failed.push(StationReply::failure(
                missing.clone(),
                "fan-out",
                "no response received before timeout",
            ));
        }

        let status = if failed.is_empty() { "SUCCESS" } else { "FAILURE" }.to_string();

        Self {
            status,
            hash_ids_succeeded: succeeded,
            hash_ids_failed: failed,
            responses_failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_replies_count_as_failed() {
        let expected: HashSet<String> = ["h-A".to_string(), "h-B".to_string()].into_iter().collect();
        let replies = vec![StationReply::success("h-A")];
        let agg = FanOutAggregate::build(&expected, replies);
        assert_eq!(agg.status, "FAILURE");
        assert_eq!(agg.hash_ids_succeeded, vec!["h-A".to_string()]);
        assert_eq!(agg.hash_ids_failed, vec!["h-B".to_string()]);
        assert_eq!(agg.responses_failed.len(), 1);
    }

    #[test]
    fn all_succeeded_is_success() {
        let expected: HashSet<String> = ["h-A".to_string()].into_iter().collect();
        let replies = vec![StationReply::success("h-A")];
        let agg = FanOutAggregate::build(&expected, replies);
        assert_eq!(agg.status, "SUCCESS");
        assert!(agg.hash_ids_failed.is_empty());
    }

    #[test]
    fn deprecated_single_hash_id_folds_into_target_set() {
        let payload = ControlRequestPayload {
            hash_ids: Vec::new(),
            hash_id: Some("h-Z".to_string()),
            extra: Value::Null,
        };
        assert_eq!(payload.target_hash_ids(), vec!["h-Z".to_string()]);
    }
}
