//! HTTP control-plane transport, per spec.md §4.6: `POST
//! /ui/{version}/{procedure}`, JSON body as payload, JSON body back.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::Value;

use super::dispatch::{dispatch, parse_procedure, unknown_procedure};
use super::UiServerState;

pub async fn ui_http_handler(
    State(state): State<UiServerState>,
    Path((_version, procedure)): Path<(String, String)>,
    body: Bytes,
) -> impl IntoResponse {
    let Some(procedure) = parse_procedure(&procedure) else {
        return (StatusCode::BAD_REQUEST, Json(unknown_procedure(&procedure)));
    };

    let payload_value = if body.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Object(Default::default()))
    };
    let payload = serde_json::from_value(payload_value).unwrap_or_default();

    let result = dispatch(&state.control_bus, &state.fleet, procedure, payload).await;
    (status_for(&result), Json(result))
}

/// `SUCCESS` → 200, `FAILURE` → 400, anything else → 500 (spec.md §4.6).
fn status_for(result: &Value) -> StatusCode {
    match result.get("status").and_then(Value::as_str) {
        Some("SUCCESS") => StatusCode::OK,
        Some("FAILURE") => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
