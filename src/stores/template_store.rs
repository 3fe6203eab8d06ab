//! Station-template cache, per spec.md §2 "TemplateStore" / §5 "Shared
//! state" (template parse cache keyed by content hash, evicted LRU).
//!
//! Grounded on the teacher's read-through repository caches
//! (`infrastructure/database/storage.rs`), generalized from a DB-backed
//! cache to a file-backed one keyed by SHA-256 content hash instead of a
//! primary key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::domain::template::StationTemplate;
use crate::error::ConfigError;
use crate::support::hash::template_hash;

struct CachedTemplate {
    content_hash: String,
    template: Arc<StationTemplate>,
}

/// Loads and content-hashes station templates from disk, caching parsed
/// results keyed by file path; re-parses only when the file's content
/// hash changes (spec.md §4.1 step 1: "Read and content-hash the
/// template; check cache").
pub struct TemplateStore {
    cache: Mutex<HashMap<PathBuf, CachedTemplate>>,
}

pub type SharedTemplateStore = Arc<TemplateStore>;

impl TemplateStore {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn shared() -> SharedTemplateStore {
        Arc::new(Self::new())
    }

    /// Returns the parsed template and its content hash, re-reading from
    /// disk only if not cached or if the on-disk content changed.
    pub fn load(&self, path: &Path) -> Result<(Arc<StationTemplate>, String), ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let content_hash = template_hash(&raw);

        {
            let cache = self.cache.lock().expect("template cache mutex poisoned");
            if let Some(entry) = cache.get(path) {
                if entry.content_hash == content_hash {
                    debug!(path = %path.display(), "template cache hit");
                    return Ok((entry.template.clone(), entry.content_hash.clone()));
                }
            }
        }

        info!(path = %path.display(), "parsing station template");
        let parsed: StationTemplate = serde_json::from_str(&raw).map_err(|source| ConfigError::ParseTemplate {
            path: path.display().to_string(),
            source,
        })?;
        let template = Arc::new(parsed);

        let mut cache = self.cache.lock().expect("template cache mutex poisoned");
        cache.insert(
            path.to_path_buf(),
            CachedTemplate {
                content_hash: content_hash.clone(),
                template: template.clone(),
            },
        );
        Ok((template, content_hash))
    }

    /// Drop a path's cached entry — called by the config-file watcher on a
    /// `change` event (spec.md §9 "File watchers").
    pub fn invalidate(&self, path: &Path) {
        self.cache.lock().expect("template cache mutex poisoned").remove(path);
    }

    pub fn len(&self) -> usize {
        self.cache.lock().expect("template cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_minimal_template(path: &Path) {
        let mut f = std::fs::File::create(path).unwrap();
        writeln!(
            f,
            r#"{{"chargePointModel":"M","chargePointVendor":"V","power":22000,"Connectors":{{"1":{{}}}}}}"#
        )
        .unwrap();
    }

    #[test]
    fn cache_hit_on_unchanged_content() {
        let dir = std::env::temp_dir().join(format!("tmpl-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("station.json");
        write_minimal_template(&path);

        let store = TemplateStore::new();
        let (t1, h1) = store.load(&path).unwrap();
        let (t2, h2) = store.load(&path).unwrap();
        assert_eq!(h1, h2);
        assert!(Arc::ptr_eq(&t1, &t2));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn invalidate_forces_reparse() {
        let dir = std::env::temp_dir().join(format!("tmpl-inv-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("station.json");
        write_minimal_template(&path);

        let store = TemplateStore::new();
        let (t1, _) = store.load(&path).unwrap();
        store.invalidate(&path);
        let (t2, _) = store.load(&path).unwrap();
        assert!(!Arc::ptr_eq(&t1, &t2));

        std::fs::remove_dir_all(&dir).ok();
    }
}
