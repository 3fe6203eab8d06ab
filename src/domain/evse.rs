//! EVSE grouping, per spec.md §3: "Groups connectors when the template
//! uses the 2.0 topology".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::connector::{Availability, Connector};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evse {
    pub id: u32,
    pub availability: Availability,
    pub connectors: BTreeMap<u32, Connector>,
}

impl Evse {
    pub fn new(id: u32, connector_ids: &[u32]) -> Self {
        Self {
            id,
            availability: Availability::Operative,
            connectors: connector_ids.iter().map(|&cid| (cid, Connector::new(cid))).collect(),
        }
    }
}

/// Either a flat connector map OR an evses map — never both, per the
/// invariant in spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConnectorTopology {
    Flat(BTreeMap<u32, Connector>),
    Grouped(BTreeMap<u32, Evse>),
}

impl ConnectorTopology {
    pub fn flat_connector_ids(&self) -> Vec<u32> {
        match self {
            Self::Flat(m) => m.keys().copied().collect(),
            Self::Grouped(evses) => evses.values().flat_map(|e| e.connectors.keys().copied()).collect(),
        }
    }

    pub fn connector(&self, id: u32) -> Option<&Connector> {
        match self {
            Self::Flat(m) => m.get(&id),
            Self::Grouped(evses) => evses.values().find_map(|e| e.connectors.get(&id)),
        }
    }

    pub fn connector_mut(&mut self, id: u32) -> Option<&mut Connector> {
        match self {
            Self::Flat(m) => m.get_mut(&id),
            Self::Grouped(evses) => evses.values_mut().find_map(|e| e.connectors.get_mut(&id)),
        }
    }

    /// Sibling connector ids sharing an EVSE with `id` (empty for flat
    /// topology, or for the connector's own EVSE having a single
    /// connector) — used by the "no existing transaction on its siblings"
    /// guard in spec.md §4.1.
    pub fn siblings_of(&self, id: u32) -> Vec<u32> {
        match self {
            Self::Flat(_) => Vec::new(),
            Self::Grouped(evses) => evses
                .values()
                .find(|e| e.connectors.contains_key(&id))
                .map(|e| e.connectors.keys().copied().filter(|&c| c != id).collect())
                .unwrap_or_default(),
        }
    }

    pub fn count(&self) -> usize {
        self.flat_connector_ids().len()
    }

    /// Number of EVSEs (used for `powerDivider` computation); falls back
    /// to connector count for flat topologies.
    pub fn number_of_units(&self) -> usize {
        match self {
            Self::Flat(m) => m.len(),
            Self::Grouped(evses) => evses.len(),
        }
    }
}
