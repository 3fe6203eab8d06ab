//! Top-level configuration store with file-watching, per spec.md §2
//! "ConfigStore" / §6 "The config file is watched; `change` events trigger
//! the registered reload callback" / §9 "File watchers: use OS-level
//! change notifications; coalesce rapid events".

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::ConfigError;

/// Debounce window for coalescing rapid successive file-change events.
const WATCH_DEBOUNCE: Duration = Duration::from_millis(300);

/// Loads the top-level configuration and watches it for changes,
/// notifying a reload callback on each coalesced `change` event.
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<Arc<AppConfig>>,
    watcher: std::sync::Mutex<Option<RecommendedWatcher>>,
}

pub type SharedConfigStore = Arc<ConfigStore>;

impl ConfigStore {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = AppConfig::load(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            current: RwLock::new(Arc::new(config)),
            watcher: std::sync::Mutex::new(None),
        })
    }

    pub fn shared(path: &Path) -> Result<SharedConfigStore, ConfigError> {
        Ok(Arc::new(Self::load(path)?))
    }

    pub fn current(&self) -> Arc<AppConfig> {
        self.current.read().expect("config store mutex poisoned").clone()
    }

    fn reload(&self) {
        match AppConfig::load(&self.path) {
            Ok(cfg) => {
                info!(path = %self.path.display(), "configuration reloaded");
                *self.current.write().expect("config store mutex poisoned") = Arc::new(cfg);
            }
            Err(err) => {
                error!(path = %self.path.display(), error = %err, "configuration reload failed, keeping previous config");
            }
        }
    }

    /// Start watching the config file. `on_change` fires after each
    /// coalesced batch of filesystem events, once the new config has been
    /// reloaded in place.
    pub fn watch<F>(self: &Arc<Self>, mut on_change: F) -> Result<(), ConfigError>
    where
        F: FnMut() + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .map_err(|source| ConfigError::Io {
            path: self.path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, source.to_string()),
        })?;

        let watch_dir = self.path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|source| ConfigError::Io {
                path: watch_dir.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, source.to_string()),
            })?;

        let store = self.clone();
        tokio::spawn(async move {
            loop {
                let first = match rx.recv().await {
                    Some(event) => event,
                    None => return,
                };
                if !Self::touches_config_file(&first, &store.path) {
                    continue;
                }
                // Coalesce any further events that arrive within the
                // debounce window before reloading once.
                loop {
                    match tokio::time::timeout(WATCH_DEBOUNCE, rx.recv()).await {
                        Ok(Some(_)) => continue,
                        Ok(None) => return,
                        Err(_) => break,
                    }
                }
                store.reload();
                on_change();
            }
        });

        *self.watcher.lock().expect("config watcher mutex poisoned") = Some(watcher);
        Ok(())
    }

    fn touches_config_file(event: &notify::Result<Event>, config_path: &Path) -> bool {
        match event {
            Ok(ev) => {
                matches!(ev.kind, EventKind::Modify(_) | EventKind::Create(_))
                    && ev.paths.iter().any(|p| p == config_path)
            }
            Err(err) => {
                warn!(error = %err, "config watcher error");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_is_io_error() {
        let err = ConfigStore::load(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
