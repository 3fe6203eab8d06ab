//! Shared request handling used by both transports, per spec.md §4.6.
//!
//! `LIST_CHARGING_STATIONS` is answered directly from the fleet registry
//! (spec.md §4.5: "UIServer-local"); every other procedure is fanned out
//! over the control bus and the caller gets back the aggregated result.

use serde_json::{json, Value};

use crate::control_bus::{ControlRequestPayload, Procedure, SharedControlBus};
use crate::worker::SharedFleetRegistry;

pub async fn dispatch(
    control_bus: &SharedControlBus,
    fleet: &SharedFleetRegistry,
    procedure: Procedure,
    payload: ControlRequestPayload,
) -> Value {
    if procedure.is_ui_server_local() {
        return json!({
            "status": "SUCCESS",
            "chargingStations": fleet.summaries(),
        });
    }

    let fleet_hash_ids = fleet.hash_ids();
    match control_bus.request_and_aggregate(procedure, payload, &fleet_hash_ids).await {
        Ok(aggregate) => serde_json::to_value(aggregate).unwrap_or(Value::Null),
        Err(err) => json!({ "status": "FAILURE", "errorMessage": err.to_string() }),
    }
}

/// Unknown procedure name arriving over either transport.
pub fn unknown_procedure(raw: &str) -> Value {
    json!({ "status": "FAILURE", "errorMessage": format!("unknown procedure: {raw}") })
}

/// Parse a `SCREAMING_SNAKE_CASE` procedure name the same way the wire
/// format spells it, per spec.md §4.5's procedure list.
pub fn parse_procedure(raw: &str) -> Option<Procedure> {
    serde_json::from_value(Value::String(raw.to_string())).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_bus::ControlBus;
    use crate::worker::FleetRegistry;

    #[test]
    fn parse_procedure_round_trips_known_names() {
        assert_eq!(parse_procedure("LIST_CHARGING_STATIONS"), Some(Procedure::ListChargingStations));
        assert_eq!(parse_procedure("STOP_SIMULATOR"), Some(Procedure::StopSimulator));
    }

    #[test]
    fn parse_procedure_rejects_unknown_names() {
        assert_eq!(parse_procedure("NOT_A_REAL_PROCEDURE"), None);
    }

    #[test]
    fn unknown_procedure_reports_failure_with_the_raw_name() {
        let result = unknown_procedure("BOGUS");
        assert_eq!(result["status"], "FAILURE");
        assert!(result["errorMessage"].as_str().unwrap().contains("BOGUS"));
    }

    #[tokio::test]
    async fn list_charging_stations_is_answered_locally_without_a_fleet() {
        let control_bus = ControlBus::shared();
        let fleet = FleetRegistry::shared(control_bus.clone());
        let result = dispatch(&control_bus, &fleet, Procedure::ListChargingStations, ControlRequestPayload::default()).await;
        assert_eq!(result["status"], "SUCCESS");
        assert_eq!(result["chargingStations"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn fan_out_with_no_registered_stations_reports_failure() {
        let control_bus = ControlBus::shared();
        let fleet = FleetRegistry::shared(control_bus.clone());
        let result = dispatch(&control_bus, &fleet, Procedure::StopSimulator, ControlRequestPayload::default()).await;
        assert_eq!(result["status"], "FAILURE");
    }
}
