//! Control-plane bus: request fan-out and response aggregation between
//! the UIServer and the WorkerHosts, per spec.md §4.5.

pub mod bus;
pub mod messages;

pub use bus::{ControlBus, SharedControlBus, FAN_OUT_TIMEOUT};
pub use messages::{
    ControlRequest, ControlRequestPayload, ControlStatus, FanOutAggregate, Procedure, StationReply,
};
