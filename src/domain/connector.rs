//! Connector state, per spec.md §3.
//!
//! Grounded on the teacher's `domain/charge_point/model.rs` connector
//! sub-model and `rust_ocpp::v1_6::types::ChargePointStatus` /
//! `rust_ocpp::v2_0_1::enumerations::connector_status_enum_type`, mirrored
//! to the station side: here a `Connector` is something *we* drive, not
//! something we observe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::reservation::Reservation;

/// Operative / inoperative, independent of charging status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    Operative,
    Inoperative,
}

/// OCPP 1.6 connector status (`rust_ocpp::v1_6::types::ChargePointStatus`
/// is the wire vocabulary we serialize StatusNotification requests with;
/// this is the station-local superset spec.md §3 enumerates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ConnectorStatusV16 {
    Available,
    Preparing,
    Charging,
    SuspendedEVSE,
    SuspendedEV,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

impl ConnectorStatusV16 {
    pub fn to_ocpp(self) -> rust_ocpp::v1_6::types::ChargePointStatus {
        use rust_ocpp::v1_6::types::ChargePointStatus as S;
        match self {
            Self::Available => S::Available,
            Self::Preparing => S::Preparing,
            Self::Charging => S::Charging,
            Self::SuspendedEVSE => S::SuspendedEVSE,
            Self::SuspendedEV => S::SuspendedEV,
            Self::Finishing => S::Finishing,
            Self::Reserved => S::Reserved,
            Self::Unavailable => S::Unavailable,
            Self::Faulted => S::Faulted,
        }
    }

    /// Parses the `status` override a station template may set on a
    /// connector entry (spec.md §6 `ConnectorTemplate.status`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Available" => Some(Self::Available),
            "Preparing" => Some(Self::Preparing),
            "Charging" => Some(Self::Charging),
            "SuspendedEVSE" => Some(Self::SuspendedEVSE),
            "SuspendedEV" => Some(Self::SuspendedEV),
            "Finishing" => Some(Self::Finishing),
            "Reserved" => Some(Self::Reserved),
            "Unavailable" => Some(Self::Unavailable),
            "Faulted" => Some(Self::Faulted),
            _ => None,
        }
    }

    /// Whether `self -> next` is a legal OCPP 1.6 connector-status transition.
    /// Refusing illegal transitions is required by spec.md §4.1
    /// ("An illegal transition is logged and refused").
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectorStatusV16::*;
        if self == next {
            return true;
        }
        match self {
            Available => matches!(next, Preparing | Reserved | Unavailable | Faulted),
            Preparing => matches!(next, Available | Charging | SuspendedEV | Finishing | Unavailable | Faulted),
            Charging => matches!(next, SuspendedEVSE | SuspendedEV | Finishing | Unavailable | Faulted),
            SuspendedEVSE => matches!(next, Charging | Finishing | Unavailable | Faulted),
            SuspendedEV => matches!(next, Charging | Finishing | Unavailable | Faulted),
            Finishing => matches!(next, Available | Unavailable | Faulted),
            Reserved => matches!(next, Available | Preparing | Unavailable | Faulted),
            Unavailable => matches!(next, Available | Faulted),
            Faulted => matches!(next, Available | Unavailable),
        }
    }
}

/// OCPP 2.0.1 reduced connector-status set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ConnectorStatusV201 {
    Available,
    Occupied,
    Reserved,
    Unavailable,
    Faulted,
}

/// Per-connector charging profile, opaque beyond identity for this engine
/// (spec.md treats `SetChargingProfile` / `ClearChargingProfile` as state
/// mutations on a list, not as schedule evaluation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargingProfile {
    pub charging_profile_id: i32,
    pub stack_level: i32,
    pub raw: serde_json::Value,
}

/// One physical connector. Index 0 denotes the station-global pseudo
/// connector (spec.md GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connector {
    pub id: u32,
    pub availability: Availability,
    pub status_v16: ConnectorStatusV16,
    pub status_v201: ConnectorStatusV201,

    pub transaction_started: bool,
    pub transaction_id: Option<i32>,
    pub transaction_id_tag: Option<String>,
    pub transaction_start: Option<DateTime<Utc>>,

    pub energy_active_import_register_value: f64,
    pub transaction_energy_active_import_register_value: f64,

    pub authorize_id_tag: Option<String>,
    pub id_tag_authorized: bool,
    pub local_authorize_id_tag: Option<String>,
    pub id_tag_local_authorized: bool,

    pub reservation: Option<Reservation>,
    pub charging_profiles: Vec<ChargingProfile>,
}

impl Connector {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            availability: Availability::Operative,
            status_v16: ConnectorStatusV16::Available,
            status_v201: ConnectorStatusV201::Available,
            transaction_started: false,
            transaction_id: None,
            transaction_id_tag: None,
            transaction_start: None,
            energy_active_import_register_value: 0.0,
            transaction_energy_active_import_register_value: 0.0,
            authorize_id_tag: None,
            id_tag_authorized: false,
            local_authorize_id_tag: None,
            id_tag_local_authorized: false,
            reservation: None,
            charging_profiles: Vec::new(),
        }
    }

    /// Invariant from spec.md §3: `transactionId` is set iff
    /// `transactionStarted` is true.
    pub fn invariant_holds(&self) -> bool {
        self.transaction_started == self.transaction_id.is_some()
    }

    pub fn is_available_for_start(&self) -> bool {
        self.availability == Availability::Operative
            && !self.transaction_started
            && matches!(
                self.status_v16,
                ConnectorStatusV16::Available | ConnectorStatusV16::Preparing
            )
    }

    /// Apply a new 1.6 status, refusing illegal transitions (returns
    /// `false` and leaves state untouched when refused).
    pub fn set_status_v16(&mut self, next: ConnectorStatusV16) -> bool {
        if self.status_v16.can_transition_to(next) {
            self.status_v16 = next;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_invariant() {
        let mut c = Connector::new(1);
        assert!(c.invariant_holds());
        c.transaction_started = true;
        c.transaction_id = Some(7);
        assert!(c.invariant_holds());
    }

    #[test]
    fn illegal_transition_refused() {
        let mut c = Connector::new(1);
        // Available -> Finishing is not a legal direct transition.
        assert!(!c.set_status_v16(ConnectorStatusV16::Finishing));
        assert_eq!(c.status_v16, ConnectorStatusV16::Available);
        assert!(c.set_status_v16(ConnectorStatusV16::Preparing));
        assert_eq!(c.status_v16, ConnectorStatusV16::Preparing);
    }
}
