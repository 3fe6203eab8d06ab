//! WorkerHost pooling, per spec.md §4.4: distributes stations across a
//! configurable number of `WorkerHost`s under one of three sizing modes.

pub mod fleet;
pub mod host;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::{AppConfig, WorkerProcessType};
use crate::ocpp::schema::SchemaRegistry;
use crate::stores::SharedTemplateStore;
use crate::support::shutdown::ShutdownSignal;

pub use fleet::{FleetRegistry, SharedFleetRegistry, StationSummary, StationUnit};
pub use host::WorkerHost;

/// Owns every `WorkerHost` and decides, per spec.md §4.4's three modes,
/// which host receives the next `startWorkerElement` command.
pub struct WorkerHostPool {
    app_config: Arc<AppConfig>,
    templates: SharedTemplateStore,
    fleet: SharedFleetRegistry,
    schemas: Arc<SchemaRegistry>,
    hosts: Mutex<Vec<Arc<WorkerHost>>>,
    next_host_id: AtomicUsize,
}

impl WorkerHostPool {
    pub fn new(
        app_config: Arc<AppConfig>,
        templates: SharedTemplateStore,
        fleet: SharedFleetRegistry,
        schemas: Arc<SchemaRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            app_config,
            templates,
            fleet,
            schemas,
            hosts: Mutex::new(Vec::new()),
            next_host_id: AtomicUsize::new(0),
        })
    }

    pub fn host_count(&self) -> usize {
        self.hosts.lock().expect("worker pool mutex poisoned").len()
    }

    /// Iterate `stationTemplateUrls`, spawning `numberOfStations`
    /// `WorkerElement`s per entry with indices 1..N, spaced by
    /// `elementStartDelay`, per spec.md §4.7.
    pub async fn start_stations_from_templates(self: &Arc<Self>) {
        for entry in self.app_config.station_template_urls.clone() {
            let stem = Path::new(&entry.file)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("station")
                .to_string();

            for index in 1..=entry.number_of_stations {
                let host = self.acquire_host().await;
                let charging_station_id = format!("{stem}-{index:04}");
                if let Err(err) = host
                    .start_worker_element(
                        &self.templates,
                        &self.fleet,
                        &self.schemas,
                        &self.app_config,
                        charging_station_id,
                        Path::new(&entry.file),
                        index,
                    )
                    .await
                {
                    error!(file = %entry.file, index, error = %err, "failed to start worker element");
                    continue;
                }

                let delay = self.app_config.worker.element_start_delay_ms;
                if delay > 0 {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }

    /// Pick the host the next station should land on, creating a new one
    /// if the configured mode calls for it.
    async fn acquire_host(self: &Arc<Self>) -> Arc<WorkerHost> {
        let elements_per_worker = self.app_config.worker.elements_per_worker;
        let pool_min_size = self.app_config.worker.pool_min_size;
        let pool_max_size = self.app_config.worker.pool_max_size;

        match self.app_config.worker.process_type {
            WorkerProcessType::WorkerSet => {
                if let Some(host) = self.least_loaded_under(elements_per_worker) {
                    return host;
                }
                self.spawn_host().await
            }
            WorkerProcessType::StaticPool => {
                self.ensure_pool_size(pool_min_size.max(1)).await;
                self.least_loaded().expect("pool was just ensured non-empty")
            }
            WorkerProcessType::DynamicPool => {
                self.ensure_pool_size(pool_min_size.max(1)).await;
                if let Some(host) = self.least_loaded_under(elements_per_worker) {
                    return host;
                }
                if (self.host_count() as u32) < pool_max_size {
                    self.spawn_host().await
                } else {
                    self.least_loaded().expect("pool was just ensured non-empty")
                }
            }
        }
    }

    fn least_loaded(&self) -> Option<Arc<WorkerHost>> {
        self.hosts
            .lock()
            .expect("worker pool mutex poisoned")
            .iter()
            .min_by_key(|h| h.element_count())
            .cloned()
    }

    fn least_loaded_under(&self, capacity: u32) -> Option<Arc<WorkerHost>> {
        self.hosts
            .lock()
            .expect("worker pool mutex poisoned")
            .iter()
            .filter(|h| (h.element_count() as u32) < capacity)
            .min_by_key(|h| h.element_count())
            .cloned()
    }

    async fn ensure_pool_size(self: &Arc<Self>, target: u32) {
        while (self.host_count() as u32) < target {
            self.spawn_host().await;
        }
    }

    /// Add a new host, spaced by `workerStartDelay` from the previous one
    /// (spec.md §4.4: "Hosts are started with `workerStartDelay` spacing").
    async fn spawn_host(self: &Arc<Self>) -> Arc<WorkerHost> {
        let is_first = self.host_count() == 0;
        let delay = self.app_config.worker.worker_start_delay_ms;
        if !is_first && delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let id = self.next_host_id.fetch_add(1, Ordering::SeqCst);
        let host = WorkerHost::new(id);
        self.hosts.lock().expect("worker pool mutex poisoned").push(host.clone());
        info!(host = id, "worker host started");
        host
    }

    /// `dynamicPool`'s `POOL_MAX_INACTIVE_TIME` idle reap: drop hosts with
    /// no elements that have sat idle past the configured threshold, down
    /// to `poolMinSize`.
    pub fn spawn_idle_reaper(self: &Arc<Self>, shutdown: ShutdownSignal) {
        if self.app_config.worker.process_type != WorkerProcessType::DynamicPool {
            return;
        }
        let pool = self.clone();
        tokio::spawn(async move {
            let check_interval = Duration::from_millis(pool.app_config.worker.pool_max_inactive_time_ms.max(1000) / 2);
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(check_interval) => {}
                    _ = shutdown.wait() => return,
                }
                let max_inactive = Duration::from_millis(pool.app_config.worker.pool_max_inactive_time_ms);
                let min_size = pool.app_config.worker.pool_min_size.max(1);
                let mut hosts = pool.hosts.lock().expect("worker pool mutex poisoned");
                if hosts.len() as u32 <= min_size {
                    continue;
                }
                let before = hosts.len();
                hosts.retain(|h| h.element_count() > 0 || h.idle_for() < max_inactive || hosts_len_would_underflow(before, min_size));
                if hosts.len() != before {
                    warn!(reaped = before - hosts.len(), "idle worker hosts reaped");
                }
            }
        });
    }
}

fn hosts_len_would_underflow(current_len: usize, min_size: u32) -> bool {
    current_len as u32 <= min_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::control_bus::ControlBus;

    fn pool_with(process_type: WorkerProcessType, elements_per_worker: u32, pool_min_size: u32, pool_max_size: u32) -> Arc<WorkerHostPool> {
        let mut app_config = AppConfig::default();
        app_config.worker = WorkerConfig {
            process_type,
            elements_per_worker,
            pool_min_size,
            pool_max_size,
            element_start_delay_ms: 0,
            worker_start_delay_ms: 0,
            ..WorkerConfig::default()
        };
        let control_bus = ControlBus::shared();
        WorkerHostPool::new(
            Arc::new(app_config),
            crate::stores::TemplateStore::shared(),
            FleetRegistry::shared(control_bus),
            Arc::new(SchemaRegistry::bundled()),
        )
    }

    #[tokio::test]
    async fn worker_set_reuses_hosts_under_capacity() {
        let pool = pool_with(WorkerProcessType::WorkerSet, 2, 1, 1);
        let first = pool.acquire_host().await;
        let second = pool.acquire_host().await;
        assert_eq!(first.id, second.id, "second element should land on the same host while under elementsPerWorker");
        assert_eq!(pool.host_count(), 1);
    }

    #[tokio::test]
    async fn worker_set_spawns_new_host_once_capacity_exceeded() {
        // elementsPerWorker=0 means no host ever has spare capacity, so every
        // acquisition must spawn a fresh host.
        let pool = pool_with(WorkerProcessType::WorkerSet, 0, 1, 1);
        let first = pool.acquire_host().await;
        let second = pool.acquire_host().await;
        assert_ne!(first.id, second.id, "exceeding elementsPerWorker should spawn a second host");
        assert_eq!(pool.host_count(), 2);
    }

    #[tokio::test]
    async fn static_pool_is_sized_to_pool_min_size_up_front() {
        let pool = pool_with(WorkerProcessType::StaticPool, 50, 4, 4);
        let _ = pool.acquire_host().await;
        assert_eq!(pool.host_count(), 4, "staticPool should pre-create poolMinSize hosts on first acquisition");
    }

    #[tokio::test]
    async fn dynamic_pool_grows_to_max_then_reuses_least_loaded() {
        // elementsPerWorker=0 simulates every host always being "full," so
        // growth is driven purely by poolMaxSize.
        let pool = pool_with(WorkerProcessType::DynamicPool, 0, 1, 3);
        for _ in 0..3 {
            let _ = pool.acquire_host().await;
        }
        assert_eq!(pool.host_count(), 3, "dynamicPool should grow one host per acquisition, bounded by poolMaxSize");

        // A fourth acquisition arrives after poolMaxSize is already reached: it
        // must reuse an existing host rather than spawn a fourth.
        let _ = pool.acquire_host().await;
        assert_eq!(pool.host_count(), 3);
    }

    #[test]
    fn hosts_len_would_underflow_at_or_below_min_size() {
        assert!(hosts_len_would_underflow(2, 2));
        assert!(hosts_len_would_underflow(1, 2));
        assert!(!hosts_len_would_underflow(3, 2));
    }
}
