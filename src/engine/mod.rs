//! Per-station protocol engine, per spec.md §4.1 `StationEngine`.

pub mod atg;
pub mod meter;
pub mod request_cache;
pub mod station_engine;

pub use atg::Atg;
pub use request_cache::{RequestCache, OCPP_WS_COMMAND_TIMEOUT};
pub use station_engine::{EngineCommand, EngineConfig, EngineHandle, StationEngine};
