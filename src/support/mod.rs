//! Cross-cutting utilities: OCPP-J framing, shutdown coordination, hashing.

pub mod hash;
pub mod ocpp_frame;
pub mod shutdown;

pub use ocpp_frame::{OcppFrame, OcppFrameError};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
