//! `ui0.0.1` WebSocket sub-protocol, per spec.md §4.6.
//!
//! Frames are JSON arrays: `[uuid, procedureName, payload]` in, `[uuid,
//! {status, ...}]` out. Grounded on the teacher's
//! `interfaces/ws/notifications.rs` upgrade/split/select loop shape.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::dispatch::{dispatch, parse_procedure, unknown_procedure};
use super::UiServerState;

pub const UI_SUBPROTOCOL: &str = "ui0.0.1";

/// WebSocket close codes from RFC 6455, per spec.md §4.6.
const PROTOCOL_ERROR_CODE: u16 = 1002;
const INVALID_PAYLOAD_CODE: u16 = 1007;

pub async fn ui_ws_handler(ws: WebSocketUpgrade, State(state): State<UiServerState>) -> impl IntoResponse {
    ws.protocols([UI_SUBPROTOCOL]).on_upgrade(move |socket| handle_socket(socket, state))
}

enum FrameOutcome {
    Reply(String),
    Close(u16, &'static str),
    Ignore,
}

async fn handle_socket(socket: WebSocket, state: UiServerState) {
    let (mut sender, mut receiver) = socket.split();

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                warn!(%err, "ui websocket read error");
                break;
            }
        };

        match handle_frame(&state, &text).await {
            FrameOutcome::Reply(json) => {
                if let Err(err) = sender.send(Message::Text(json.into())).await {
                    warn!(%err, "ui websocket write error");
                    break;
                }
            }
            FrameOutcome::Close(code, reason) => {
                let _ = sender
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
            FrameOutcome::Ignore => continue,
        }
    }
}

/// Validate `[uuid, procedure, payload]`, per spec.md §4.6: a frame that
/// isn't valid JSON or doesn't carry a UUID closes with `1002` (protocol
/// error); one with a well-formed shape but no usable payload object
/// closes with `1007` (invalid payload).
async fn handle_frame(state: &UiServerState, text: &str) -> FrameOutcome {
    let frame: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(err) => {
            debug!(%err, frame = text, "malformed ui frame");
            return FrameOutcome::Close(PROTOCOL_ERROR_CODE, "malformed frame");
        }
    };

    let Some(arr) = frame.as_array() else {
        return FrameOutcome::Close(PROTOCOL_ERROR_CODE, "frame must be a JSON array");
    };
    let (Some(uuid_value), Some(procedure_name)) = (arr.first(), arr.get(1).and_then(Value::as_str)) else {
        return FrameOutcome::Close(PROTOCOL_ERROR_CODE, "frame must be [uuid, procedure, payload]");
    };
    if uuid_value.as_str().and_then(|s| Uuid::parse_str(s).ok()).is_none() {
        return FrameOutcome::Close(INVALID_PAYLOAD_CODE, "uuid must be a valid UUID string");
    }

    let payload_value = match arr.get(2).cloned() {
        Some(Value::Object(map)) => Value::Object(map),
        None => Value::Object(Default::default()),
        Some(_) => return FrameOutcome::Close(INVALID_PAYLOAD_CODE, "payload must be an object"),
    };

    let result = match parse_procedure(procedure_name) {
        Some(procedure) => {
            let payload = serde_json::from_value(payload_value).unwrap_or_default();
            dispatch(&state.control_bus, &state.fleet, procedure, payload).await
        }
        None => unknown_procedure(procedure_name),
    };

    match serde_json::to_string(&serde_json::json!([uuid_value, result])) {
        Ok(json) => FrameOutcome::Reply(json),
        Err(_) => FrameOutcome::Ignore,
    }
}
