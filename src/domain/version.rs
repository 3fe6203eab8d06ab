//! OCPP protocol version.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Supported OCPP protocol versions (spec.md §1: "speak the OCPP-J 1.6 and
/// 2.0 wire protocols"). Hot reload of the protocol version per station is
/// explicitly a Non-goal, so this is fixed at station-initialization time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OcppVersion {
    /// OCPP 1.6 (JSON / OCPP-J)
    V16,
    /// OCPP 2.0.1
    V201,
}

impl OcppVersion {
    /// WebSocket subprotocol identifier advertised during the handshake.
    pub fn subprotocol(&self) -> &'static str {
        match self {
            Self::V16 => "ocpp1.6",
            Self::V201 => "ocpp2.0.1",
        }
    }

    pub fn from_subprotocol(s: &str) -> Option<Self> {
        match s.trim() {
            "ocpp1.6" => Some(Self::V16),
            "ocpp2.0.1" => Some(Self::V201),
            _ => None,
        }
    }

    pub const ALL: &'static [OcppVersion] = &[Self::V16, Self::V201];

    pub fn version_string(&self) -> &'static str {
        match self {
            Self::V16 => "1.6",
            Self::V201 => "2.0.1",
        }
    }
}

impl fmt::Display for OcppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OCPP {}", self.version_string())
    }
}

impl Default for OcppVersion {
    fn default() -> Self {
        Self::V16
    }
}
