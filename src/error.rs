//! Error taxonomy.
//!
//! Mirrors the split the teacher draws between `DomainError` / `InfraError`
//! (see `support/errors.rs` in the teacher repo), generalized to the seven
//! error categories spec.md §7 calls out: protocol, validation, timeout,
//! state, I/O, security and transport errors.

use thiserror::Error;

/// Errors raised by a single station's protocol engine.
#[derive(Debug, Error)]
pub enum StationError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("payload failed schema validation for action {action}: {detail}")]
    Validation { action: String, detail: String },

    #[error("request timed out after {0:?}")]
    RequestTimeout(std::time::Duration),

    #[error("invalid state: {0}")]
    State(String),

    #[error("station is not registered (BootNotification not yet Accepted)")]
    NotAccepted,

    #[error("connector {0} not found")]
    ConnectorNotFound(u32),

    #[error("connector {0} is unavailable")]
    ConnectorUnavailable(u32),

    #[error("connector {0} already has an active transaction")]
    TransactionAlreadyActive(u32),

    #[error("no active transaction on connector {0}")]
    NoActiveTransaction(u32),

    #[error("id tag {0} was not authorized")]
    NotAuthorized(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("security violation: {0}")]
    Security(String),
}

/// Errors raised while loading or watching configuration / templates.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to parse template {path}: {source}")]
    ParseTemplate {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("template {0} not found")]
    TemplateNotFound(String),
}

/// Errors surfaced by the control-plane bus / UI server.
#[derive(Debug, Error)]
pub enum ControlBusError {
    #[error("unknown procedure: {0}")]
    UnknownProcedure(String),

    #[error("no stations matched the request")]
    NoTargets,

    #[error("fan-out timed out waiting for {missing} of {expected} responses")]
    FanOutTimeout { expected: usize, missing: usize },

    #[error("station {0} is not connected")]
    StationOffline(String),
}

/// Top-level error, used at process boundaries (main, UI HTTP handlers).
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Station(#[from] StationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    ControlBus(#[from] ControlBusError),
}

pub type StationResult<T> = Result<T, StationError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
