//! Reservation state, per spec.md §3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Accepted,
    Occupied,
    Expired,
    Cancelled,
}

/// Why a reservation is being terminated. spec.md §9 flags the source's
/// `ReservationTerminationReason` switch as a defect (`||` used where a
/// fall-through over three reasons was intended); all three reasons are
/// handled identically here by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationTerminationReason {
    ReservationCanceled,
    ReplaceExisting,
    Expired,
    TransactionStarted,
}

impl ReservationTerminationReason {
    /// All three "the reservation is simply gone" reasons share one code
    /// path; only `TransactionStarted` additionally links a transaction id.
    pub fn clears_reservation(self) -> bool {
        matches!(
            self,
            Self::ReservationCanceled | Self::ReplaceExisting | Self::Expired | Self::TransactionStarted
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: i32,
    pub connector_id: u32,
    pub id_tag: String,
    pub parent_id_tag: Option<String>,
    pub expiry_date: DateTime<Utc>,
    pub reservation_status: ReservationStatus,
}

impl Reservation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry_date
    }

    pub fn matches(&self, id_tag: &str) -> bool {
        self.id_tag == id_tag || self.parent_id_tag.as_deref() == Some(id_tag)
    }
}
