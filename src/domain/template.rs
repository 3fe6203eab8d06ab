//! Station template file format, per spec.md §6.
//!
//! The specific content of station-template JSON files is explicitly out
//! of scope beyond "the fields the engine reads" (spec.md §1); this module
//! models exactly those fields the rest of the engine consumes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::version::OcppVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CurrentOutType {
    #[serde(rename = "AC")]
    Ac,
    #[serde(rename = "DC")]
    Dc,
}

impl Default for CurrentOutType {
    fn default() -> Self {
        Self::Ac
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerUnit {
    #[serde(rename = "W")]
    Watt,
    #[serde(rename = "kW")]
    KiloWatt,
}

impl Default for PowerUnit {
    fn default() -> Self {
        Self::Watt
    }
}

/// `power` may be a single number (applied to every connector) or a
/// per-connector array, per spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PowerSpec {
    Single(f64),
    PerConnector(Vec<f64>),
}

impl PowerSpec {
    pub fn for_connector(&self, index: usize) -> f64 {
        match self {
            Self::Single(p) => *p,
            Self::PerConnector(v) => v.get(index).copied().unwrap_or_else(|| v.first().copied().unwrap_or(0.0)),
        }
    }
}

/// Distribution policy for picking an id tag, referenced from spec.md §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdTagDistribution {
    Random,
    RoundRobin,
    ConnectorAffinity,
}

impl Default for IdTagDistribution {
    fn default() -> Self {
        Self::Random
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomaticTransactionGeneratorConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_min_delay")]
    pub min_delay_between_two_transactions: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_between_two_transactions: u64,
    #[serde(default = "default_probability")]
    pub probability_of_start: f64,
    #[serde(default = "default_min_duration")]
    pub min_duration_of_transaction: u64,
    #[serde(default = "default_max_duration")]
    pub max_duration_of_transaction: u64,
    #[serde(default)]
    pub require_authorize: bool,
    #[serde(default)]
    pub stop_on_connection_failure: bool,
    #[serde(default = "default_stop_after_hours")]
    pub stop_after_hours: f64,
    #[serde(default)]
    pub id_tag_distribution: IdTagDistribution,
}

fn default_min_delay() -> u64 {
    15
}
fn default_max_delay() -> u64 {
    30
}
fn default_probability() -> f64 {
    1.0
}
fn default_min_duration() -> u64 {
    60
}
fn default_max_duration() -> u64 {
    1200
}
fn default_stop_after_hours() -> f64 {
    24.0 * 365.0
}

impl Default for AutomaticTransactionGeneratorConfig {
    fn default() -> Self {
        Self {
            enable: false,
            min_delay_between_two_transactions: default_min_delay(),
            max_delay_between_two_transactions: default_max_delay(),
            probability_of_start: default_probability(),
            min_duration_of_transaction: default_min_duration(),
            max_duration_of_transaction: default_max_duration(),
            require_authorize: false,
            stop_on_connection_failure: false,
            stop_after_hours: default_stop_after_hours(),
            id_tag_distribution: IdTagDistribution::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConnectorTemplate {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EvseTemplate {
    #[serde(default)]
    pub connectors: HashMap<String, ConnectorTemplate>,
}

/// Field casing follows spec.md §6 literally: the four structural blocks
/// are capitalized (`Connectors`, `Evses`, `AutomaticTransactionGenerator`,
/// `Configuration`) while every other field is camelCase — hence per-field
/// renames rather than a single container-level `rename_all`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationTemplate {
    #[serde(default, rename = "Connectors")]
    pub connectors: Option<HashMap<String, ConnectorTemplate>>,
    #[serde(default, rename = "Evses")]
    pub evses: Option<HashMap<String, EvseTemplate>>,

    #[serde(default, rename = "AutomaticTransactionGenerator")]
    pub automatic_transaction_generator: Option<AutomaticTransactionGeneratorConfig>,
    #[serde(default, rename = "Configuration")]
    pub configuration: Option<HashMap<String, String>>,

    pub charge_point_model: String,
    pub charge_point_vendor: String,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub firmware_version_pattern: Option<String>,

    pub power: PowerSpec,
    #[serde(default)]
    pub power_unit: PowerUnit,
    #[serde(default)]
    pub number_of_phases: Option<u8>,
    #[serde(default)]
    pub current_out_type: Option<CurrentOutType>,
    #[serde(default = "default_voltage")]
    pub voltage_out: f64,
    #[serde(default)]
    pub ocpp_version: Option<OcppVersion>,

    #[serde(default)]
    pub supervision_urls: Option<SupervisionUrls>,
    #[serde(default)]
    pub supervision_url_ocpp_configuration: bool,
    #[serde(default)]
    pub supervision_url_ocpp_key: Option<String>,

    #[serde(default)]
    pub use_connector_id0: bool,
    #[serde(default)]
    pub random_connectors: bool,
    #[serde(default = "default_true")]
    pub auto_register: bool,
    #[serde(default)]
    pub amperage_limitation_ocpp_key: Option<String>,
    #[serde(default)]
    pub power_shared_by_connectors: bool,

    #[serde(default)]
    pub payload_schema_validation: bool,

    #[serde(default = "default_true")]
    pub ocpp_persistent_configuration: bool,
    #[serde(default = "default_true")]
    pub station_info_persistent_configuration: bool,
    #[serde(default = "default_true")]
    pub automatic_transaction_generator_persistent_configuration: bool,
}

fn default_voltage() -> f64 {
    230.0
}
fn default_true() -> bool {
    true
}

/// `supervisionUrls` may be one URL or a list, per spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SupervisionUrls {
    Single(String),
    Many(Vec<String>),
}

impl SupervisionUrls {
    pub fn as_slice_owned(&self) -> Vec<String> {
        match self {
            Self::Single(s) => vec![s.clone()],
            Self::Many(v) => v.clone(),
        }
    }
}

impl StationTemplate {
    pub fn number_of_connectors(&self) -> usize {
        if let Some(evses) = &self.evses {
            evses.values().map(|e| e.connectors.len()).sum()
        } else if let Some(connectors) = &self.connectors {
            connectors.len()
        } else {
            1
        }
    }

    pub fn uses_evse_topology(&self) -> bool {
        self.evses.is_some()
    }

    pub fn current_out_type(&self) -> CurrentOutType {
        self.current_out_type.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_template() {
        let json = serde_json::json!({
            "chargePointModel": "Model-X",
            "chargePointVendor": "Vendor-Y",
            "power": 22000,
            "Connectors": {"1": {}, "2": {}}
        });
        let tmpl: StationTemplate = serde_json::from_value(json).unwrap();
        assert_eq!(tmpl.number_of_connectors(), 2);
        assert!(!tmpl.uses_evse_topology());
        assert_eq!(tmpl.power.for_connector(0), 22000.0);
    }

    #[test]
    fn per_connector_power() {
        let spec = PowerSpec::PerConnector(vec![11000.0, 22000.0]);
        assert_eq!(spec.for_connector(1), 22000.0);
        assert_eq!(spec.for_connector(5), 11000.0);
    }
}
