//! OcppService: per-version request builders, response validators, and
//! incoming-request handlers, per spec.md §4.2.
//!
//! spec.md §9 flags the teacher's `Ocpp{16,20}Service extends OcppService`
//! inheritance chain for replacement with "per-version modules satisfying
//! a shared capability set `{buildRequest, validate, handleIncoming}`;
//! dispatch on a discriminator held in the station" — `OcppVersion` is
//! that discriminator, and `v16`/`v201` are those modules. There is no
//! shared trait object: the two versions' request/response vocabularies
//! are different `rust_ocpp` types, so "shared capability set" means
//! "same module shape", not "same trait".

pub mod schema;
pub mod v16;
pub mod v201;

use chrono::{DateTime, Utc};

pub use schema::SchemaRegistry;

/// Reset kind requested by an incoming `Reset` call, version-agnostic
/// (v1.6 `Hard`/`Soft`, v2.0.1 `Immediate`/`OnIdle` both collapse to this).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    Soft,
    Hard,
}

/// `TriggerMessage.requestedMessage`, version-agnostic subset spec.md §4.2
/// actually exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMessageKind {
    BootNotification,
    DiagnosticsStatusNotification,
    FirmwareStatusNotification,
    Heartbeat,
    MeterValues,
    StatusNotification,
}

/// Side effects an incoming CSMS call asks the (not-yet-built) engine to
/// carry out *after* the immediate CALLRESULT has been sent — the few
/// actions from spec.md §4.2's incoming list that are more than a state
/// mutation on `Station`/`Connector`.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    Reset {
        kind: ResetKind,
    },
    RemoteStartTransaction {
        connector_id: Option<u32>,
        id_tag: String,
    },
    RemoteStopTransaction {
        transaction_id: i32,
    },
    TriggerMessage {
        message: TriggerMessageKind,
        connector_id: Option<u32>,
    },
    GetDiagnostics {
        location: String,
    },
    UpdateFirmware {
        location: String,
        retrieve_date: DateTime<Utc>,
    },
}

/// Result of handling one incoming CALL: the CALLRESULT payload to echo
/// back immediately, plus an optional follow-up for the engine.
#[derive(Debug, Clone)]
pub struct IncomingOutcome {
    pub response: serde_json::Value,
    pub engine_action: Option<EngineAction>,
}

impl IncomingOutcome {
    pub fn response_only(response: serde_json::Value) -> Self {
        Self { response, engine_action: None }
    }

    pub fn with_action(response: serde_json::Value, action: EngineAction) -> Self {
        Self { response, engine_action: Some(action) }
    }
}
