//! EV charging station fleet simulator speaking OCPP-J 1.6 / 2.0.1 against
//! a CSMS over WebSocket.
//!
//! - **domain**: station/connector/evse/template state, OCPP-version-agnostic.
//! - **ocpp**: wire codec and per-version CALL handlers (1.6 / 2.0.1).
//! - **engine**: per-station protocol engine (`StationEngine`) and the ATG.
//! - **control_bus**: typed request/response bus between UIServer and WorkerHosts.
//! - **worker**: `WorkerHost` pooling and the shared fleet registry.
//! - **ui_server**: WebSocket (`ui0.0.1`) + HTTP control-plane endpoint.
//! - **stores**: shared read-through caches (config, templates, id tags).
//! - **support**: cross-cutting utilities (hashing, shutdown, OCPP frames).
//! - **supervisor**: process bootstrap singleton.

pub mod config;
pub mod control_bus;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ocpp;
pub mod stores;
pub mod supervisor;
pub mod support;
pub mod ui_server;
pub mod worker;

pub use config::{default_config_path, AppConfig};
pub use supervisor::Supervisor;
