//! Process-wide bootstrap singleton, per spec.md §4.7.
//!
//! Grounded on the teacher's `main.rs` wiring order (config → metrics →
//! shared state → servers) plus `ShutdownCoordinator`'s signal/task
//! structure, generalized into an explicit `start`/`stop`/`reset` object
//! instead of inline `main` logic, since `reset()` needs to tear the whole
//! stack down and rebuild it from a reloaded config.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{error, info};

use crate::control_bus::ControlBus;
use crate::engine::EngineCommand;
use crate::error::ConfigError;
use crate::ocpp::schema::SchemaRegistry;
use crate::stores::{ConfigStore, SharedConfigStore, SharedTemplateStore, TemplateStore};
use crate::support::shutdown::ShutdownSignal;
use crate::ui_server::UiServer;
use crate::worker::{FleetRegistry, SharedFleetRegistry, WorkerHostPool};

/// Everything a single `start()`/`stop()` cycle owns. Torn down as a unit
/// by `stop()` and rebuilt from scratch by `reset()`.
struct RunningState {
    config_store: SharedConfigStore,
    fleet: SharedFleetRegistry,
    ui_shutdown: ShutdownSignal,
}

pub struct Supervisor {
    config_path: PathBuf,
    assets_dir: PathBuf,
    state: Mutex<Option<RunningState>>,
}

impl Supervisor {
    pub fn new(config_path: PathBuf, assets_dir: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            config_path,
            assets_dir,
            state: Mutex::new(None),
        })
    }

    /// Initialize `ConfigStore`; open the UIServer and performance-storage
    /// sink; spawn `WorkerHost`s; iterate `stationTemplateUrls`, spacing
    /// spawns by `elementStartDelay`; watch the configuration file.
    pub async fn start(self: &Arc<Self>) -> Result<(), ConfigError> {
        let config_store = ConfigStore::shared(&self.config_path)?;
        let app_config = config_store.current();

        let schemas = Arc::new(SchemaRegistry::load(&self.assets_dir));
        let templates: SharedTemplateStore = TemplateStore::shared();
        let control_bus = ControlBus::shared();
        let fleet: SharedFleetRegistry = FleetRegistry::shared(control_bus.clone());
        fleet.spawn_control_loop();

        let worker_pool = WorkerHostPool::new(app_config.clone(), templates, fleet.clone(), schemas);
        worker_pool.start_stations_from_templates().await;

        let ui_shutdown = ShutdownSignal::new();
        if app_config.ui_server.enabled {
            let ui_server = UiServer::new(app_config.ui_server.clone(), control_bus.clone(), fleet.clone());
            let ui_shutdown_for_task = ui_shutdown.clone();
            tokio::spawn(async move {
                if let Err(err) = ui_server.run(ui_shutdown_for_task).await {
                    error!(%err, "ui server exited with error");
                }
            });
        }
        worker_pool.spawn_idle_reaper(ui_shutdown.clone());

        let supervisor = self.clone();
        config_store.watch(move || {
            let supervisor = supervisor.clone();
            tokio::spawn(async move {
                info!("configuration file changed, resetting supervisor");
                if let Err(err) = supervisor.reset().await {
                    error!(%err, "supervisor reset failed");
                }
            });
        })?;

        *self.state.lock().expect("supervisor state mutex poisoned") = Some(RunningState {
            config_store,
            fleet,
            ui_shutdown,
        });
        info!("supervisor started");
        Ok(())
    }

    /// Stop every ATG, stop every station (its own `Stop` handling ensures
    /// outstanding transactions end properly), and close the UIServer.
    pub async fn stop(&self) {
        let Some(state) = self.state.lock().expect("supervisor state mutex poisoned").take() else {
            return;
        };

        state.ui_shutdown.trigger();

        for unit in state.fleet.all() {
            unit.atg.stop(None);
            if let Err(err) = unit
                .handle
                .send(EngineCommand::Stop {
                    reason: "supervisor shutdown".to_string(),
                })
                .await
            {
                error!(hash_id = %unit.handle.hash_id, %err, "error stopping station during supervisor shutdown");
            }
        }

        info!("supervisor stopped");
    }

    pub async fn reset(self: &Arc<Self>) -> Result<(), ConfigError> {
        self.stop().await;
        self.start().await
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().expect("supervisor state mutex poisoned").is_some()
    }

    pub fn fleet(&self) -> Option<SharedFleetRegistry> {
        self.state
            .lock()
            .expect("supervisor state mutex poisoned")
            .as_ref()
            .map(|s| s.fleet.clone())
    }
}
