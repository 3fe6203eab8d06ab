//! Per-action JSON-Schema validation, per spec.md §4.2 "Per-action JSON
//! schemas loaded once from the asset directory; validation is controlled
//! by `payloadSchemaValidation`".
//!
//! Grounded on the `jsonschema` crate choice made by `mastercom-au-ocpp`
//! (an OCPP-specific Rust crate in the reference pack) for exactly this
//! purpose. Schemas are consolidated one JSON document per OCPP version
//! (action name → schema) rather than one file per action, which is
//! easier to ship and diff while remaining "per-action" in effect.

use std::collections::HashMap;
use std::path::Path;

use jsonschema::JSONSchema;
use serde_json::Value;

use crate::domain::version::OcppVersion;
use crate::error::StationError;

const DEFAULT_V16: &str = include_str!("../../assets/schemas/v16.json");
const DEFAULT_V201: &str = include_str!("../../assets/schemas/v201.json");

/// Compiled schemas for every known action, keyed by `(version, action)`.
///
/// Schemas are loaded once at startup and live for the process's lifetime,
/// so leaking the owned `Value`s to get `'static` borrows for `JSONSchema`
/// is intentional, not a leak bug.
pub struct SchemaRegistry {
    schemas: HashMap<(OcppVersion, String), JSONSchema>,
}

impl SchemaRegistry {
    /// Load schema documents from `assets_dir/v16.json` and
    /// `assets_dir/v201.json`, falling back to the bundled defaults for
    /// whichever file is absent.
    pub fn load(assets_dir: &Path) -> Self {
        let v16_raw = std::fs::read_to_string(assets_dir.join("v16.json")).unwrap_or_else(|_| DEFAULT_V16.to_string());
        let v201_raw = std::fs::read_to_string(assets_dir.join("v201.json")).unwrap_or_else(|_| DEFAULT_V201.to_string());
        Self::from_documents(&v16_raw, &v201_raw)
    }

    pub fn bundled() -> Self {
        Self::from_documents(DEFAULT_V16, DEFAULT_V201)
    }

    fn from_documents(v16_raw: &str, v201_raw: &str) -> Self {
        let mut schemas = HashMap::new();
        Self::compile_into(&mut schemas, OcppVersion::V16, v16_raw);
        Self::compile_into(&mut schemas, OcppVersion::V201, v201_raw);
        Self { schemas }
    }

    fn compile_into(schemas: &mut HashMap<(OcppVersion, String), JSONSchema>, version: OcppVersion, raw: &str) {
        let doc: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(err) => {
                tracing::error!(?version, error = %err, "malformed schema document, skipping");
                return;
            }
        };
        let Value::Object(map) = doc else {
            tracing::error!(?version, "schema document is not a JSON object, skipping");
            return;
        };
        for (action, schema) in map {
            let leaked: &'static Value = Box::leak(Box::new(schema));
            match JSONSchema::compile(leaked) {
                Ok(compiled) => {
                    schemas.insert((version, action), compiled);
                }
                Err(err) => {
                    tracing::error!(?version, action = action.as_str(), error = %err, "failed to compile schema");
                }
            }
        }
    }

    /// Validate `payload` against the schema for `(version, action)`.
    /// Actions with no registered schema pass unvalidated (treated as
    /// permissive), matching spec.md's "skip if validation disabled"
    /// semantics when no schema asset exists for a custom/vendor action.
    pub fn validate(&self, version: OcppVersion, action: &str, payload: &Value) -> Result<(), StationError> {
        let Some(schema) = self.schemas.get(&(version, action.to_string())) else {
            return Ok(());
        };
        schema.validate(payload).map_err(|errors| {
            let detail = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
            StationError::Validation {
                action: action.to_string(),
                detail,
            }
        })
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::bundled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_notification_requires_vendor_and_model() {
        let registry = SchemaRegistry::bundled();
        let bad = serde_json::json!({ "chargePointVendor": "Acme" });
        assert!(registry.validate(OcppVersion::V16, "BootNotification", &bad).is_err());

        let good = serde_json::json!({ "chargePointVendor": "Acme", "chargePointModel": "X1" });
        assert!(registry.validate(OcppVersion::V16, "BootNotification", &good).is_ok());
    }

    #[test]
    fn unknown_action_passes_unvalidated() {
        let registry = SchemaRegistry::bundled();
        assert!(registry.validate(OcppVersion::V16, "SomeVendorExtension", &serde_json::json!({})).is_ok());
    }

    #[test]
    fn v201_boot_notification_schema_loaded() {
        let registry = SchemaRegistry::bundled();
        let bad = serde_json::json!({});
        assert!(registry.validate(OcppVersion::V201, "BootNotification", &bad).is_err());
    }
}
