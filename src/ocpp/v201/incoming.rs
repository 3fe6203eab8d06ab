//! OCPP 2.0.1 incoming actions, per spec.md §4.2's "2.0 covered" set:
//! only `Reset` has an inbound handler at this protocol version.

use serde_json::{json, Value};

use crate::error::StationError;
use crate::ocpp::{EngineAction, IncomingOutcome, ResetKind};

fn missing_field(action: &str, field: &str) -> StationError {
    StationError::Validation {
        action: action.to_string(),
        detail: format!("missing or malformed field `{field}`"),
    }
}

pub fn handle(action: &str, payload: Value) -> Result<IncomingOutcome, StationError> {
    match action {
        "Reset" => reset(&payload),
        other => Err(StationError::Protocol(format!("unsupported incoming action: {other}"))),
    }
}

fn reset(payload: &Value) -> Result<IncomingOutcome, StationError> {
    let kind = match payload.get("type").and_then(Value::as_str) {
        Some("Immediate") => ResetKind::Hard,
        Some("OnIdle") => ResetKind::Soft,
        _ => return Err(missing_field("Reset", "type")),
    };
    Ok(IncomingOutcome::with_action(json!({ "status": "Accepted" }), EngineAction::Reset { kind }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_reset_maps_to_hard() {
        let outcome = handle("Reset", json!({"type": "Immediate"})).unwrap();
        assert_eq!(outcome.engine_action, Some(EngineAction::Reset { kind: ResetKind::Hard }));
    }

    #[test]
    fn unsupported_action_is_protocol_error() {
        let err = handle("SetVariables", json!({})).unwrap_err();
        assert!(matches!(err, StationError::Protocol(_)));
    }
}
