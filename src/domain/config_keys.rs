//! Per-station OCPP configuration-key store (spec.md §3 `ConfigurationKey`,
//! §4.1 "Install default OCPP keys").
//!
//! Ordered insertion with uniqueness on `key` (case-sensitive lookup by
//! default, case-insensitive fallback for GetConfiguration), grounded on
//! the teacher's `session/manager.rs` "insert, preserve order, look up by
//! key" shape generalized from connections to configuration entries.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationKey {
    pub key: String,
    pub value: String,
    pub readonly: bool,
    pub visible: bool,
    pub reboot: bool,
}

impl ConfigurationKey {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            readonly: false,
            visible: true,
            reboot: false,
        }
    }

    pub fn readonly(mut self, v: bool) -> Self {
        self.readonly = v;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn needs_reboot(mut self) -> Self {
        self.reboot = true;
        self
    }
}

/// Well-known key names. `HeartbeatInterval` / `HeartBeatInterval` is kept
/// as two physically distinct entries per spec.md §9 ("preserve both for
/// wire compatibility but treat them as a single logical key").
pub const KEY_HEARTBEAT_INTERVAL: &str = "HeartbeatInterval";
pub const KEY_HEART_BEAT_INTERVAL: &str = "HeartBeatInterval";
pub const KEY_SUPPORTED_FEATURE_PROFILES: &str = "SupportedFeatureProfiles";
pub const KEY_NUMBER_OF_CONNECTORS: &str = "NumberOfConnectors";
pub const KEY_METER_VALUES_SAMPLED_DATA: &str = "MeterValuesSampledData";
pub const KEY_CONNECTOR_PHASE_ROTATION: &str = "ConnectorPhaseRotation";
pub const KEY_AUTHORIZE_REMOTE_TX_REQUESTS: &str = "AuthorizeRemoteTxRequests";
pub const KEY_CONNECTION_TIMEOUT: &str = "ConnectionTimeOut";
pub const KEY_LOCAL_AUTH_LIST_ENABLED: &str = "LocalAuthListEnabled";
pub const KEY_METER_VALUE_SAMPLE_INTERVAL: &str = "MeterValueSampleInterval";
pub const KEY_WEBSOCKET_PING_INTERVAL: &str = "WebSocketPingInterval";

/// Ordered, uniquely-keyed configuration-key sequence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcppConfigKeys {
    entries: Vec<ConfigurationKey>,
}

impl OcppConfigKeys {
    pub fn new() -> Self {
        Self::default()
    }

    fn position_case_sensitive(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.key == key)
    }

    fn position_case_insensitive(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.key.eq_ignore_ascii_case(key))
    }

    /// Insert or, if `overwrite`, replace a key. Per spec.md §8: adding an
    /// existing key with `overwrite=false` is a no-op; `true` replaces
    /// atomically in place (preserving insertion order).
    pub fn set(&mut self, entry: ConfigurationKey, overwrite: bool) -> bool {
        match self.position_case_sensitive(&entry.key) {
            Some(idx) => {
                if overwrite {
                    self.entries[idx] = entry;
                    true
                } else {
                    false
                }
            }
            None => {
                self.entries.push(entry);
                true
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&ConfigurationKey> {
        self.entries.iter().find(|e| e.key == key)
    }

    pub fn get_case_insensitive(&self, key: &str) -> Option<&ConfigurationKey> {
        self.position_case_insensitive(key).map(|i| &self.entries[i])
    }

    pub fn get_value(&self, key: &str) -> Option<&str> {
        self.get(key).map(|e| e.value.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<ConfigurationKey> {
        self.position_case_sensitive(key).map(|idx| self.entries.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigurationKey> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Set the heartbeat interval (seconds) on both the canonical key and
    /// its hidden historical duplicate, per spec.md §9.
    pub fn set_heartbeat_interval(&mut self, seconds: u64) {
        self.set(ConfigurationKey::new(KEY_HEARTBEAT_INTERVAL, seconds.to_string()), true);
        self.set(
            ConfigurationKey::new(KEY_HEART_BEAT_INTERVAL, seconds.to_string()).hidden(),
            true,
        );
    }

    pub fn heartbeat_interval(&self) -> Option<u64> {
        self.get_value(KEY_HEARTBEAT_INTERVAL).and_then(|v| v.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_preserved() {
        let mut keys = OcppConfigKeys::new();
        keys.set(ConfigurationKey::new("B", "2"), true);
        keys.set(ConfigurationKey::new("A", "1"), true);
        let names: Vec<&str> = keys.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
    }

    #[test]
    fn no_overwrite_is_noop() {
        let mut keys = OcppConfigKeys::new();
        keys.set(ConfigurationKey::new("K", "1"), true);
        let changed = keys.set(ConfigurationKey::new("K", "2"), false);
        assert!(!changed);
        assert_eq!(keys.get_value("K"), Some("1"));
    }

    #[test]
    fn overwrite_replaces_in_place() {
        let mut keys = OcppConfigKeys::new();
        keys.set(ConfigurationKey::new("K", "1"), true);
        keys.set(ConfigurationKey::new("Other", "x"), true);
        keys.set(ConfigurationKey::new("K", "2"), true);
        assert_eq!(keys.get_value("K"), Some("2"));
        let names: Vec<&str> = keys.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(names, vec!["K", "Other"]);
    }

    #[test]
    fn heartbeat_interval_updates_both_keys() {
        let mut keys = OcppConfigKeys::new();
        keys.set_heartbeat_interval(30);
        assert_eq!(keys.get_value(KEY_HEARTBEAT_INTERVAL), Some("30"));
        assert_eq!(keys.get_value(KEY_HEART_BEAT_INTERVAL), Some("30"));
        assert_eq!(keys.get(KEY_HEART_BEAT_INTERVAL).unwrap().visible, false);
    }

    #[test]
    fn case_insensitive_lookup() {
        let mut keys = OcppConfigKeys::new();
        keys.set(ConfigurationKey::new("HeartbeatInterval", "10"), true);
        assert!(keys.get_case_insensitive("heartbeatinterval").is_some());
    }
}
