//! `WorkerHost`: hosts a bounded set of `StationEngine` instances, per
//! spec.md §4.4.
//!
//! Each `StationEngine`/`Atg` pair is already a pair of lightweight tokio
//! tasks rather than an OS thread, so a `WorkerHost` here is bookkeeping —
//! `elementsPerWorker` accounting and `elementStartDelay` pacing — rather
//! than an isolation boundary the way the teacher's session shards are;
//! grounded on the teacher's `session/manager.rs` "bounded registry +
//! spaced startup" shape.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::domain::config_keys::KEY_AUTHORIZE_REMOTE_TX_REQUESTS;
use crate::domain::station::Station;
use crate::domain::template::StationTemplate;
use crate::engine::{Atg, EngineCommand, EngineConfig, StationEngine};
use crate::error::ConfigError;
use crate::ocpp::schema::SchemaRegistry;
use crate::stores::{station_config_store, IdTagsCache, SharedTemplateStore};

use super::fleet::{SharedFleetRegistry, StationUnit};

/// One worker host: a bounded, named group of stations plus its own idle
/// clock for `dynamicPool`'s `POOL_MAX_INACTIVE_TIME` reap.
pub struct WorkerHost {
    pub id: usize,
    elements: Mutex<Vec<StationUnit>>,
    last_activity: Mutex<Instant>,
}

impl WorkerHost {
    pub fn new(id: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            elements: Mutex::new(Vec::new()),
            last_activity: Mutex::new(Instant::now()),
        })
    }

    pub fn element_count(&self) -> usize {
        self.elements.lock().expect("worker host mutex poisoned").len()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().expect("worker host mutex poisoned").elapsed()
    }

    fn touch(&self) {
        *self.last_activity.lock().expect("worker host mutex poisoned") = Instant::now();
    }

    /// `startWorkerElement{stationId, templateFile}`: load the template,
    /// build and spawn the station's engine and ATG, and register it in
    /// the shared fleet. Per spec.md §4.1 steps 1-6 (template load/hash,
    /// topology materialization, derived electrical values, default OCPP
    /// keys) via `TemplateStore::load` + `Station::from_template`.
    #[allow(clippy::too_many_arguments)]
    pub async fn start_worker_element(
        self: &Arc<Self>,
        templates: &SharedTemplateStore,
        fleet: &SharedFleetRegistry,
        schemas: &Arc<SchemaRegistry>,
        app_config: &AppConfig,
        charging_station_id: String,
        template_path: &Path,
        index: u32,
    ) -> Result<(), ConfigError> {
        let (template, content_hash) = templates.load(template_path)?;

        let mut station = Station::from_template(
            template.as_ref(),
            index,
            charging_station_id.clone(),
            template_path.display().to_string(),
            content_hash,
        );

        // Step 2: merge persisted per-station configuration onto the
        // template-derived defaults, only if it still matches this
        // template's content hash.
        if let Some(persisted) = station_config_store::load(&app_config.station_config_dir, &station.hash_id, &station.template_hash) {
            station_config_store::apply_to(&mut station, &persisted);
        }

        let connector_ids = station.topology.flat_connector_ids();
        let hash_id = station.hash_id.clone();

        let engine_config = engine_config_for(app_config, template.as_ref(), &station);
        let supervision_urls = resolve_supervision_urls(app_config, template.as_ref(), index);
        let auto_register = template.auto_register;
        let atg_config = template.automatic_transaction_generator.clone().unwrap_or_default();
        let id_tags = IdTagsCache::shared(Vec::new());

        // Step 6: persist configuration if it changed, gated by the
        // template's three persistence flags.
        let atg_value = serde_json::to_value(&atg_config).ok();
        if let Err(err) = station_config_store::save(
            &app_config.station_config_dir,
            &station,
            template.ocpp_persistent_configuration,
            template.station_info_persistent_configuration,
            template.automatic_transaction_generator_persistent_configuration,
            atg_value.as_ref(),
        ) {
            warn!(%hash_id, error = %err, "failed to persist station configuration");
        }

        let handle = StationEngine::spawn(station, engine_config, schemas.clone(), supervision_urls);
        let atg = Arc::new(Atg::new(handle.clone(), atg_config.clone(), id_tags));

        let unit = StationUnit {
            charging_station_id,
            handle: handle.clone(),
            atg: atg.clone(),
            connector_ids: connector_ids.clone(),
        };
        fleet.register(unit.clone());
        self.elements.lock().expect("worker host mutex poisoned").push(unit);
        self.touch();

        if auto_register {
            handle.fire_and_forget(EngineCommand::Start);
        }
        if atg_config.enable {
            atg.start(&connector_ids);
        }

        info!(host = self.id, %hash_id, "worker element started");
        Ok(())
    }
}

/// `EngineConfig` fields AppConfig/the template genuinely override; every
/// other knob keeps `EngineConfig::default()`'s value since neither source
/// models it (spec.md §1 scopes template content to "the fields the engine
/// reads").
fn engine_config_for(app_config: &AppConfig, template: &StationTemplate, station: &Station) -> EngineConfig {
    let mut config = EngineConfig {
        auto_reconnect_max_retries: app_config.auto_reconnect_max_retries,
        payload_schema_validation: template.payload_schema_validation,
        ..EngineConfig::default()
    };
    if let Some(raw) = station.config_keys.get_value(KEY_AUTHORIZE_REMOTE_TX_REQUESTS) {
        config.authorize_remote_tx_requests = raw.parse().unwrap_or(config.authorize_remote_tx_requests);
    }
    config
}

/// A template's own `supervisionUrls` always wins (it's an explicit
/// per-station override); otherwise pick one URL out of the global pool
/// per spec.md §4.7's distribution policy and pass it down as that
/// station's one-entry failover list.
fn resolve_supervision_urls(app_config: &AppConfig, template: &StationTemplate, index: u32) -> Vec<String> {
    if let Some(urls) = &template.supervision_urls {
        return urls.as_slice_owned();
    }
    match app_config.supervision_url_distribution.select(&app_config.supervision_urls, index) {
        Some(url) => vec![url.to_string()],
        None => {
            warn!(index, "no supervision URLs configured, station will stall on connect");
            Vec::new()
        }
    }
}
