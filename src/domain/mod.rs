//! Core station data model (spec.md §3): identity, connector/EVSE state,
//! reservations, configuration keys, and the station template format.

pub mod config_keys;
pub mod connector;
pub mod evse;
pub mod reservation;
pub mod station;
pub mod template;
pub mod version;

pub use config_keys::{ConfigurationKey, OcppConfigKeys};
pub use connector::{Availability, ChargingProfile, Connector, ConnectorStatusV16, ConnectorStatusV201};
pub use evse::{ConnectorTopology, Evse};
pub use reservation::{Reservation, ReservationStatus, ReservationTerminationReason};
pub use station::{BootNotificationResult, ElectricalProfile, RegistrationStatus, Station};
pub use template::StationTemplate;
pub use version::OcppVersion;
