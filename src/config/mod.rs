//! Top-level configuration, per spec.md §6 "Environment & top-level
//! configuration".
//!
//! Grounded on the teacher's `AppConfig` (TOML file + `toml`/`serde`,
//! loaded from an XDG path via `dirs-next`) referenced from `main.rs`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// `ROUND_ROBIN` / `RANDOM` / `CHARGING_STATION_AFFINITY` distribution of
/// `supervisionUrls` across stations, per spec.md §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupervisionUrlDistribution {
    RoundRobin,
    Random,
    #[default]
    ChargingStationAffinity,
}

impl SupervisionUrlDistribution {
    /// Unknown values fall back to `CHARGING_STATION_AFFINITY` per spec.md §4.7.
    pub fn parse_or_default(raw: &str) -> Self {
        match raw {
            "ROUND_ROBIN" => Self::RoundRobin,
            "RANDOM" => Self::Random,
            "CHARGING_STATION_AFFINITY" => Self::ChargingStationAffinity,
            _ => Self::ChargingStationAffinity,
        }
    }

    /// Pick the one supervision URL assigned to a 1-based station `index`
    /// out of the global pool, per spec.md §4.7: `ROUND_ROBIN` →
    /// `(index-1) mod N`, `RANDOM` → uniform pick, `CHARGING_STATION_AFFINITY`
    /// → same formula as round-robin (stable per station since `index`
    /// never changes across restarts).
    pub fn select<'a>(self, urls: &'a [String], index: u32) -> Option<&'a str> {
        if urls.is_empty() {
            return None;
        }
        let chosen = match self {
            Self::RoundRobin | Self::ChargingStationAffinity => &urls[(index.saturating_sub(1) as usize) % urls.len()],
            Self::Random => {
                use rand::seq::SliceRandom;
                urls.choose(&mut rand::thread_rng()).expect("urls is non-empty")
            }
        };
        Some(chosen.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationTemplateUrl {
    pub file: String,
    pub number_of_stations: u32,
}

/// Worker-host scheduling mode, per spec.md §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum WorkerProcessType {
    #[default]
    WorkerSet,
    StaticPool,
    DynamicPool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    #[serde(default)]
    pub process_type: WorkerProcessType,
    #[serde(default = "default_elements_per_worker")]
    pub elements_per_worker: u32,
    #[serde(default = "default_pool_min_size")]
    pub pool_min_size: u32,
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
    #[serde(default = "default_pool_max_inactive_time")]
    pub pool_max_inactive_time_ms: u64,
    #[serde(default)]
    pub element_start_delay_ms: u64,
    #[serde(default)]
    pub worker_start_delay_ms: u64,
    #[serde(default)]
    pub restart_worker_on_error: bool,
}

fn default_elements_per_worker() -> u32 {
    50
}
fn default_pool_min_size() -> u32 {
    4
}
fn default_pool_max_size() -> u32 {
    16
}
fn default_pool_max_inactive_time() -> u64 {
    60_000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            process_type: WorkerProcessType::default(),
            elements_per_worker: default_elements_per_worker(),
            pool_min_size: default_pool_min_size(),
            pool_max_size: default_pool_max_size(),
            pool_max_inactive_time_ms: default_pool_max_inactive_time(),
            element_start_delay_ms: 0,
            worker_start_delay_ms: 0,
            restart_worker_on_error: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApplicationProtocol {
    Ws,
    Http,
}

impl Default for ApplicationProtocol {
    fn default() -> Self {
        Self::Ws
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UiServerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ui_host")]
    pub host: String,
    #[serde(default = "default_ui_port")]
    pub port: u16,
    #[serde(default)]
    pub protocol: ApplicationProtocol,
    #[serde(default)]
    pub auth_username: Option<String>,
    #[serde(default)]
    pub auth_password: Option<String>,
}

fn default_ui_host() -> String {
    "0.0.0.0".to_string()
}
fn default_ui_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub supervision_urls: Vec<String>,
    #[serde(default)]
    pub supervision_url_distribution: SupervisionUrlDistribution,
    #[serde(default)]
    pub station_template_urls: Vec<StationTemplateUrl>,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub ui_server: UiServerConfig,
    #[serde(default)]
    pub performance_storage: StorageConfig,
    #[serde(default = "default_auto_reconnect_max_retries")]
    pub auto_reconnect_max_retries: i64,
    /// Directory holding one persisted-configuration JSON file per station
    /// (spec.md §6 "Persisted station configuration"), distinct from
    /// `performanceStorage`.
    #[serde(default = "default_station_config_dir")]
    pub station_config_dir: PathBuf,
}

fn default_auto_reconnect_max_retries() -> i64 {
    -1
}

fn default_station_config_dir() -> PathBuf {
    PathBuf::from("station-configurations")
}

impl AppConfig {
    /// Load from a TOML file; deprecated top-level aliases are tolerated
    /// (spec.md §6: "Deprecated aliases are tolerated with a warning").
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut table: toml::Value = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Self::apply_deprecated_aliases(&mut table);
        table.try_into().map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    fn apply_deprecated_aliases(table: &mut toml::Value) {
        if let Some(map) = table.as_table_mut() {
            if let Some(old) = map.remove("chargingStationTemplateUrls") {
                tracing::warn!("config key `chargingStationTemplateUrls` is deprecated, use `stationTemplateUrls`");
                map.entry("stationTemplateUrls").or_insert(old);
            }
            if let Some(old) = map.remove("supervisionUrlOcppConfiguration") {
                map.entry("supervisionUrlDistribution").or_insert(old);
            }
        }
    }
}

/// XDG-style default config path, following the teacher's
/// `default_config_path()` helper built on `dirs_next`.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ocpp-fleet-simulator")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_distribution_falls_back_to_affinity() {
        assert_eq!(
            SupervisionUrlDistribution::parse_or_default("GARBAGE"),
            SupervisionUrlDistribution::ChargingStationAffinity
        );
    }

    #[test]
    fn affinity_selection_is_stable_per_index() {
        let urls = vec!["ws://a".to_string(), "ws://b".to_string(), "ws://c".to_string()];
        assert_eq!(SupervisionUrlDistribution::ChargingStationAffinity.select(&urls, 1), Some("ws://a"));
        assert_eq!(SupervisionUrlDistribution::ChargingStationAffinity.select(&urls, 4), Some("ws://a"));
        assert_eq!(SupervisionUrlDistribution::RoundRobin.select(&urls, 2), Some("ws://b"));
    }

    #[test]
    fn defaults_parse_from_empty_table() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.auto_reconnect_max_retries, -1);
        assert_eq!(cfg.worker.elements_per_worker, 50);
    }
}
