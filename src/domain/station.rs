//! Station identity and lifecycle state, per spec.md §3.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config_keys::{
    ConfigurationKey, OcppConfigKeys, KEY_AUTHORIZE_REMOTE_TX_REQUESTS, KEY_CONNECTION_TIMEOUT,
    KEY_CONNECTOR_PHASE_ROTATION, KEY_LOCAL_AUTH_LIST_ENABLED, KEY_METER_VALUES_SAMPLED_DATA, KEY_NUMBER_OF_CONNECTORS,
    KEY_SUPPORTED_FEATURE_PROFILES,
};
use super::connector::{Connector, ConnectorStatusV16};
use super::evse::{ConnectorTopology, Evse};
use super::template::{CurrentOutType, StationTemplate};
use super::version::OcppVersion;

/// Registration gate: whether/why the CSMS has accepted this station.
/// `None` until the first BootNotification response arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootNotificationResult {
    pub status: RegistrationStatus,
    pub interval: u64,
    pub current_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    Accepted,
    Pending,
    Rejected,
}

impl RegistrationStatus {
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Derived electrical parameters, computed once at initialization
/// (spec.md §4.1 step 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectricalProfile {
    pub maximum_power_w: f64,
    pub maximum_amperage_a: f64,
    pub voltage_out: f64,
    pub number_of_phases: u8,
    pub current_out_type: CurrentOutType,
    /// `powerDivider`: `evses? numberOfEvses : numberOfConnectors`,
    /// overridden to `runningTransactions` when `powerSharedByConnectors`.
    pub power_divider: u32,
    pub power_shared_by_connectors: bool,
}

impl ElectricalProfile {
    pub fn per_connector_capacity_w(&self) -> f64 {
        if self.power_divider == 0 {
            self.maximum_power_w
        } else {
            self.maximum_power_w / self.power_divider as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Created,
    Starting,
    Started,
    Stopping,
    Stopped,
}

/// A single simulated charging station: identity, derived electrical
/// values, flags, and all mutable protocol/connector state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub hash_id: String,
    pub charging_station_id: String,
    pub index: u32,
    pub ocpp_version: OcppVersion,
    pub template_path: String,
    pub template_hash: String,

    pub charge_point_vendor: String,
    pub charge_point_model: String,
    pub firmware_version: Option<String>,

    pub electrical: ElectricalProfile,

    #[serde(skip, default)]
    pub started: bool,
    #[serde(skip, default)]
    pub starting: bool,
    #[serde(skip, default)]
    pub stopping: bool,

    pub boot_notification_response: Option<BootNotificationResult>,
    pub heartbeat_interval_s: u64,
    pub firmware_status: Option<rust_ocpp::v1_6::types::FirmwareStatus>,

    pub config_keys: OcppConfigKeys,
    pub topology: ConnectorTopology,

    #[serde(skip, default)]
    pub auto_reconnect_retry_count: u32,
    #[serde(skip, default)]
    pub ws_connection_restarted: bool,
}

impl Station {
    /// Build a station's initial in-memory state from its parsed template,
    /// per spec.md §4.1 initialization steps 3-5 (materialize topology,
    /// compute derived electrical values, install default OCPP keys).
    ///
    /// Step 2 (merge persisted per-station configuration) and step 6
    /// (persist if changed) are the caller's responsibility — this builder
    /// only ever produces template-derived defaults.
    pub fn from_template(
        template: &StationTemplate,
        index: u32,
        charging_station_id: String,
        template_path: String,
        template_hash: String,
    ) -> Self {
        let hash_id = crate::support::hash::station_hash_id(&template_path, index, &template_hash);
        let ocpp_version = template.ocpp_version.unwrap_or_default();
        let topology = build_topology(template);

        let current_out_type = template.current_out_type();
        let number_of_phases = template.number_of_phases.unwrap_or(match current_out_type {
            CurrentOutType::Ac => 3,
            CurrentOutType::Dc => 1,
        });
        let maximum_power_w = total_power_w(template, &topology);
        let voltage_out = template.voltage_out;
        let maximum_amperage_a = if voltage_out > 0.0 && number_of_phases > 0 {
            maximum_power_w / (voltage_out * number_of_phases as f64)
        } else {
            0.0
        };

        let electrical = ElectricalProfile {
            maximum_power_w,
            maximum_amperage_a,
            voltage_out,
            number_of_phases,
            current_out_type,
            power_divider: topology.number_of_units().max(1) as u32,
            power_shared_by_connectors: template.power_shared_by_connectors,
        };

        let config_keys = default_config_keys(template, &topology);

        Self {
            hash_id,
            charging_station_id,
            index,
            ocpp_version,
            template_path,
            template_hash,
            charge_point_vendor: template.charge_point_vendor.clone(),
            charge_point_model: template.charge_point_model.clone(),
            firmware_version: template.firmware_version.clone(),
            electrical,
            started: false,
            starting: false,
            stopping: false,
            boot_notification_response: None,
            heartbeat_interval_s: 0,
            firmware_status: None,
            config_keys,
            topology,
            auto_reconnect_retry_count: 0,
            ws_connection_restarted: false,
        }
    }

    /// Only state in which non-boot OCPP requests may be issued to the
    /// CSMS, per spec.md §3 invariants.
    pub fn is_registered(&self) -> bool {
        self.boot_notification_response
            .as_ref()
            .map(|b| b.status.is_accepted())
            .unwrap_or(false)
    }

    pub fn running_transactions(&self) -> u32 {
        match &self.topology {
            ConnectorTopology::Flat(m) => m.values().filter(|c| c.transaction_started).count() as u32,
            ConnectorTopology::Grouped(evses) => evses
                .values()
                .flat_map(|e| e.connectors.values())
                .filter(|c| c.transaction_started)
                .count() as u32,
        }
    }

    /// `powerDivider ≥ 1` when any transaction is active (spec.md §3
    /// invariant).
    pub fn recompute_power_divider_if_shared(&mut self) {
        if self.electrical.power_shared_by_connectors {
            self.electrical.power_divider = self.running_transactions().max(1);
        }
    }
}

/// Materialize `connectors` OR `evses` from the template, per spec.md §4.1
/// step 3. `useConnectorId0` additionally seeds the station-global pseudo
/// connector (index 0, evse.rs GLOSSARY) into a flat topology; it has no
/// meaning for a grouped one, since EVSE 0 does not exist in the 2.0
/// topology.
fn build_topology(template: &StationTemplate) -> ConnectorTopology {
    if let Some(evses) = &template.evses {
        let mut ids: Vec<&String> = evses.keys().collect();
        ids.sort();
        let map = ids
            .into_iter()
            .filter_map(|raw_id| {
                let evse_id: u32 = raw_id.parse().ok()?;
                let evse_tmpl = &evses[raw_id];
                let mut connector_ids: Vec<&String> = evse_tmpl.connectors.keys().collect();
                connector_ids.sort();
                let parsed_ids: Vec<u32> = connector_ids.into_iter().filter_map(|c| c.parse().ok()).collect();
                let mut evse = Evse::new(evse_id, &parsed_ids);
                apply_initial_statuses(&mut evse.connectors, evse_tmpl.connectors.iter());
                Some((evse_id, evse))
            })
            .collect::<BTreeMap<u32, Evse>>();
        return ConnectorTopology::Grouped(map);
    }

    let mut connectors: BTreeMap<u32, Connector> = BTreeMap::new();
    if template.use_connector_id0 {
        connectors.insert(0, Connector::new(0));
    }
    if let Some(tmpl_connectors) = &template.connectors {
        for (raw_id, connector_tmpl) in tmpl_connectors {
            let Ok(id) = raw_id.parse::<u32>() else { continue };
            connectors.insert(id, Connector::new(id));
            if let Some(status) = connector_tmpl.status.as_deref().and_then(ConnectorStatusV16::parse) {
                connectors.get_mut(&id).unwrap().status_v16 = status;
            }
        }
    } else if connectors.is_empty() {
        connectors.insert(1, Connector::new(1));
    }
    ConnectorTopology::Flat(connectors)
}

fn apply_initial_statuses<'a>(
    connectors: &mut BTreeMap<u32, Connector>,
    templates: impl Iterator<Item = (&'a String, &'a super::template::ConnectorTemplate)>,
) {
    for (raw_id, connector_tmpl) in templates {
        let Ok(id) = raw_id.parse::<u32>() else { continue };
        if let Some(status) = connector_tmpl.status.as_deref().and_then(ConnectorStatusV16::parse) {
            if let Some(connector) = connectors.get_mut(&id) {
                connector.status_v16 = status;
            }
        }
    }
}

/// Sum of per-connector power, per spec.md §4.1 step 4's derived-value
/// computation; `power`'s kW unit is normalized to watts.
fn total_power_w(template: &StationTemplate, topology: &ConnectorTopology) -> f64 {
    use super::template::PowerUnit;
    let multiplier = match template.power_unit {
        PowerUnit::Watt => 1.0,
        PowerUnit::KiloWatt => 1000.0,
    };
    let ids = topology.flat_connector_ids();
    if ids.is_empty() {
        return template.power.for_connector(0) * multiplier;
    }
    ids.iter().enumerate().map(|(i, _)| template.power.for_connector(i) * multiplier).sum()
}

/// Install default OCPP configuration keys absent from a fresh station,
/// per spec.md §4.1 step 5.
fn default_config_keys(template: &StationTemplate, topology: &ConnectorTopology) -> OcppConfigKeys {
    let mut keys = OcppConfigKeys::new();
    keys.set_heartbeat_interval(0);
    keys.set(
        ConfigurationKey::new(KEY_SUPPORTED_FEATURE_PROFILES, "Core,FirmwareManagement,LocalAuthListManagement,Reservation,SmartCharging,RemoteTrigger").readonly(true),
        true,
    );
    keys.set(
        ConfigurationKey::new(KEY_NUMBER_OF_CONNECTORS, topology.count().to_string()).readonly(true),
        true,
    );
    keys.set(ConfigurationKey::new(KEY_METER_VALUES_SAMPLED_DATA, "Energy.Active.Import.Register"), true);
    keys.set(ConfigurationKey::new(KEY_CONNECTOR_PHASE_ROTATION, "NotApplicable"), true);
    keys.set(
        ConfigurationKey::new(KEY_AUTHORIZE_REMOTE_TX_REQUESTS, "true"),
        true,
    );
    keys.set(ConfigurationKey::new(KEY_CONNECTION_TIMEOUT, "30"), true);
    keys.set(ConfigurationKey::new(KEY_LOCAL_AUTH_LIST_ENABLED, "false"), true);
    if let Some(key_name) = &template.supervision_url_ocpp_key {
        if !key_name.is_empty() {
            keys.set(ConfigurationKey::new(key_name.clone(), ""), true);
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::template::PowerSpec;

    fn minimal_template() -> StationTemplate {
        StationTemplate {
            connectors: Some(std::collections::HashMap::from([
                ("1".to_string(), super::super::template::ConnectorTemplate::default()),
                ("2".to_string(), super::super::template::ConnectorTemplate::default()),
            ])),
            evses: None,
            automatic_transaction_generator: None,
            configuration: None,
            charge_point_model: "Model-X".to_string(),
            charge_point_vendor: "Vendor-Y".to_string(),
            firmware_version: None,
            firmware_version_pattern: None,
            power: PowerSpec::Single(22000.0),
            power_unit: crate::domain::template::PowerUnit::Watt,
            number_of_phases: None,
            current_out_type: None,
            voltage_out: 230.0,
            ocpp_version: None,
            supervision_urls: None,
            supervision_url_ocpp_configuration: false,
            supervision_url_ocpp_key: None,
            use_connector_id0: false,
            random_connectors: false,
            auto_register: true,
            amperage_limitation_ocpp_key: None,
            power_shared_by_connectors: false,
            payload_schema_validation: false,
            ocpp_persistent_configuration: true,
            station_info_persistent_configuration: true,
            automatic_transaction_generator_persistent_configuration: true,
        }
    }

    #[test]
    fn builds_flat_topology_with_derived_electrical_values() {
        let tmpl = minimal_template();
        let station = Station::from_template(&tmpl, 1, "CS-1".into(), "templates/a.json".into(), "deadbeef".into());
        assert_eq!(station.topology.count(), 2);
        assert_eq!(station.electrical.maximum_power_w, 44000.0);
        assert_eq!(station.electrical.power_divider, 2);
        assert!(!station.is_registered());
        assert_eq!(station.config_keys.get_value(super::super::config_keys::KEY_NUMBER_OF_CONNECTORS), Some("2"));
    }

    #[test]
    fn hash_id_is_stable_for_same_inputs() {
        let tmpl = minimal_template();
        let s1 = Station::from_template(&tmpl, 1, "CS-1".into(), "templates/a.json".into(), "deadbeef".into());
        let s2 = Station::from_template(&tmpl, 1, "CS-1".into(), "templates/a.json".into(), "deadbeef".into());
        assert_eq!(s1.hash_id, s2.hash_id);
    }
}
