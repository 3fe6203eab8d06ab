//! Content-hashing helpers.
//!
//! Used to content-address station templates and persisted per-station
//! configuration files, and to derive a stable `hashId` per station.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Content hash of a template file: the hash of its raw bytes.
pub fn template_hash(contents: &str) -> String {
    sha256_hex(contents.as_bytes())
}

/// Canonical JSON hash used for `configurationHash`: the SHA-256 of the
/// serialized value using serde_json's stable key order for structs
/// (field order as declared, which is deterministic for our types).
pub fn canonical_json_hash(value: &serde_json::Value) -> String {
    sha256_hex(value.to_string().as_bytes())
}

/// Stable per-station identity: hash of template path + 1-based index +
/// template content hash, per spec.md §3 ("hashId (stable hash of
/// template path + index + template content hash)").
pub fn station_hash_id(template_path: &str, index: u32, template_content_hash: &str) -> String {
    let seed = format!("{template_path}#{index}#{template_content_hash}");
    sha256_hex(seed.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable() {
        assert_eq!(template_hash("abc"), template_hash("abc"));
        assert_ne!(template_hash("abc"), template_hash("abd"));
    }

    #[test]
    fn station_hash_id_is_stable_and_distinguishes_index() {
        let h1 = station_hash_id("templates/a.json", 1, "deadbeef");
        let h2 = station_hash_id("templates/a.json", 2, "deadbeef");
        assert_ne!(h1, h2);
        assert_eq!(h1, station_hash_id("templates/a.json", 1, "deadbeef"));
    }
}
