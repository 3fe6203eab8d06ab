//! Persisted per-station configuration, per spec.md §4.1 steps 2/3/6 and
//! §6 "Persisted station configuration".
//!
//! One JSON file per station, keyed by `hashId`, atomic-written (temp file
//! + rename) the way `ConfigStore` treats the top-level config file;
//! `configurationHash` gates re-writes the same way a content hash gates a
//! template reload.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::domain::config_keys::ConfigurationKey;
use crate::domain::evse::ConnectorTopology;
use crate::domain::station::Station;
use crate::error::ConfigError;
use crate::support::hash::canonical_json_hash;

/// Station identity fields carried in the persisted file, so a reload can
/// confirm the saved configuration still belongs to this template lineage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationInfoSnapshot {
    pub hash_id: String,
    pub charging_station_id: String,
    pub template_hash: String,
    pub charge_point_vendor: String,
    pub charge_point_model: String,
    pub firmware_version: Option<String>,
}

impl StationInfoSnapshot {
    fn of(station: &Station) -> Self {
        Self {
            hash_id: station.hash_id.clone(),
            charging_station_id: station.charging_station_id.clone(),
            template_hash: station.template_hash.clone(),
            charge_point_vendor: station.charge_point_vendor.clone(),
            charge_point_model: station.charge_point_model.clone(),
            firmware_version: station.firmware_version.clone(),
        }
    }
}

/// On-disk shape, per spec.md §6: `{configurationHash, stationInfo,
/// configurationKey[], automaticTransactionGenerator?,
/// automaticTransactionGeneratorStatuses[], connectorsStatus[] XOR
/// evsesStatus[]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedStationConfig {
    pub configuration_hash: String,
    pub station_info: StationInfoSnapshot,
    pub configuration_key: Vec<ConfigurationKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automatic_transaction_generator: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub automatic_transaction_generator_statuses: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connectors_status: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evses_status: Option<Value>,
}

fn path_for(dir: &Path, hash_id: &str) -> PathBuf {
    dir.join(format!("{hash_id}.json"))
}

/// The subset that feeds `configurationHash`, per spec.md §8's invariant:
/// SHA-256 of the canonical `{stationInfo, configurationKey,
/// automaticTransactionGenerator}` JSON.
fn hashable_value(station_info: &StationInfoSnapshot, configuration_key: &[ConfigurationKey], atg: &Option<Value>) -> Value {
    json!({
        "stationInfo": station_info,
        "configurationKey": configuration_key,
        "automaticTransactionGenerator": atg,
    })
}

fn read_existing(path: &Path) -> Option<PersistedStationConfig> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Load a previously persisted configuration for this station's `hashId`,
/// if one exists and its `templateHash` still matches (spec.md §4.1 step
/// 2: "Merge persisted per-station configuration (if its templateHash
/// matches) onto the template-derived defaults").
pub fn load(dir: &Path, hash_id: &str, template_hash: &str) -> Option<PersistedStationConfig> {
    let path = path_for(dir, hash_id);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read persisted station configuration");
            return None;
        }
    };
    let parsed: PersistedStationConfig = match serde_json::from_str(&raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to parse persisted station configuration");
            return None;
        }
    };
    if parsed.station_info.template_hash != template_hash {
        warn!(path = %path.display(), "persisted station configuration is stale (templateHash mismatch), ignoring");
        return None;
    }
    Some(parsed)
}

/// Merge a loaded configuration onto a freshly built station's
/// template-derived defaults, per spec.md §4.1 step 2. Configuration keys
/// present in `persisted` overwrite the template defaults; keys the
/// template installs that `persisted` doesn't mention are left untouched.
pub fn apply_to(station: &mut Station, persisted: &PersistedStationConfig) {
    for entry in &persisted.configuration_key {
        station.config_keys.set(entry.clone(), true);
    }
}

/// Snapshot each connector's status for the persisted file's
/// `connectorsStatus[] XOR evsesStatus[]`.
fn status_snapshot(topology: &ConnectorTopology) -> (Option<Value>, Option<Value>) {
    match topology {
        ConnectorTopology::Flat(connectors) => {
            let statuses: Vec<Value> = connectors
                .values()
                .map(|c| json!({"connectorId": c.id, "status": c.status_v16, "availability": c.availability}))
                .collect();
            (Some(Value::Array(statuses)), None)
        }
        ConnectorTopology::Grouped(evses) => {
            let statuses: Vec<Value> = evses
                .values()
                .map(|e| {
                    json!({
                        "evseId": e.id,
                        "availability": e.availability,
                        "connectors": e.connectors.values()
                            .map(|c| json!({"connectorId": c.id, "status": c.status_v16}))
                            .collect::<Vec<_>>(),
                    })
                })
                .collect();
            (None, Some(Value::Array(statuses)))
        }
    }
}

/// Persist `station`'s current configuration if its canonical hash
/// differs from what's already on disk (spec.md §6: "re-writes skipped
/// when hash unchanged"). `ocpp_persistent`/`station_info_persistent`/
/// `atg_persistent` are the template's three persistence gates; when all
/// three are off, saving is skipped entirely. Writes atomically: a temp
/// file is written then renamed over the target.
#[allow(clippy::too_many_arguments)]
pub fn save(
    dir: &Path,
    station: &Station,
    ocpp_persistent: bool,
    station_info_persistent: bool,
    atg_persistent: bool,
    atg: Option<&Value>,
) -> Result<(), ConfigError> {
    if !ocpp_persistent && !station_info_persistent && !atg_persistent {
        return Ok(());
    }

    let station_info = StationInfoSnapshot::of(station);
    let configuration_key: Vec<ConfigurationKey> =
        if ocpp_persistent { station.config_keys.iter().cloned().collect() } else { Vec::new() };
    let atg_value = if atg_persistent { atg.cloned() } else { None };

    let hashable = hashable_value(&station_info, &configuration_key, &atg_value);
    let configuration_hash = canonical_json_hash(&hashable);

    let path = path_for(dir, &station.hash_id);
    if let Some(existing) = read_existing(&path) {
        if existing.configuration_hash == configuration_hash {
            return Ok(());
        }
    }

    let (connectors_status, evses_status) = status_snapshot(&station.topology);
    let persisted = PersistedStationConfig {
        configuration_hash,
        station_info,
        configuration_key,
        automatic_transaction_generator: atg_value,
        automatic_transaction_generator_statuses: Vec::new(),
        connectors_status,
        evses_status,
    };

    fs::create_dir_all(dir).map_err(|source| ConfigError::Io { path: dir.display().to_string(), source })?;
    let body = serde_json::to_string_pretty(&persisted).map_err(|source| ConfigError::ParseTemplate {
        path: path.display().to_string(),
        source,
    })?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &body).map_err(|source| ConfigError::Io { path: tmp_path.display().to_string(), source })?;
    fs::rename(&tmp_path, &path).map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::template::{PowerSpec, PowerUnit, StationTemplate};

    fn template() -> StationTemplate {
        StationTemplate {
            connectors: Some(std::collections::HashMap::from([
                ("1".to_string(), crate::domain::template::ConnectorTemplate::default()),
            ])),
            evses: None,
            automatic_transaction_generator: None,
            configuration: None,
            charge_point_model: "Model-X".to_string(),
            charge_point_vendor: "Vendor-Y".to_string(),
            firmware_version: None,
            firmware_version_pattern: None,
            power: PowerSpec::Single(22000.0),
            power_unit: PowerUnit::Watt,
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
    fn save_then_load_round_trips_and_merges_config_keys() {
        let dir = tempfile_dir();
        let tmpl = template();
        let mut station = Station::from_template(&tmpl, 1, "CS-1".into(), "templates/a.json".into(), "deadbeef".into());
        station.config_keys.set(ConfigurationKey::new("CustomKey", "custom-value"), true);

        save(&dir, &station, true, true, true, None).unwrap();

        let loaded = load(&dir, &station.hash_id, &station.template_hash).expect("file should load back");
        assert_eq!(loaded.configuration_key.iter().find(|k| k.key == "CustomKey").unwrap().value, "custom-value");

        let mut fresh = Station::from_template(&tmpl, 1, "CS-1".into(), "templates/a.json".into(), "deadbeef".into());
        apply_to(&mut fresh, &loaded);
        assert_eq!(fresh.config_keys.get_value("CustomKey"), Some("custom-value"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn save_is_skipped_when_hash_unchanged() {
        let dir = tempfile_dir();
        let tmpl = template();
        let station = Station::from_template(&tmpl, 1, "CS-1".into(), "templates/a.json".into(), "deadbeef".into());

        save(&dir, &station, true, true, true, None).unwrap();
        let path = path_for(&dir, &station.hash_id);
        let first_write = std::fs::metadata(&path).unwrap().modified().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(10));
        save(&dir, &station, true, true, true, None).unwrap();
        let second_write = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(first_write, second_write, "unchanged configuration must not rewrite the file");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn stale_template_hash_is_rejected() {
        let dir = tempfile_dir();
        let tmpl = template();
        let station = Station::from_template(&tmpl, 1, "CS-1".into(), "templates/a.json".into(), "deadbeef".into());
        save(&dir, &station, true, true, true, None).unwrap();

        assert!(load(&dir, &station.hash_id, "a-different-hash").is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    fn tempfile_dir() -> PathBuf {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!("station-config-store-test-{}-{n}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }
}
