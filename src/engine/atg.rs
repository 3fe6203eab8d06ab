//! Automatic Transaction Generator, per spec.md §4.3: a cooperative
//! per-connector loop that starts and stops transactions under a
//! probabilistic, time-bounded policy.
//!
//! Each connector gets its own task, gated by an `AtomicBool` the owner
//! flips to pause/resume it without tearing the task down — the same
//! "stop is cooperative, not an abort" shape `StationEngine` uses for its
//! own command loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::template::AutomaticTransactionGeneratorConfig;
use crate::engine::station_engine::{EngineCommand, EngineHandle};
use crate::error::StationError;
use crate::stores::id_tags_cache::SharedIdTagsCache;

/// Counters persisted per connector, per spec.md §4.3.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AtgCounters {
    pub authorize_requests: u64,
    pub accepted_authorize_requests: u64,
    pub rejected_authorize_requests: u64,
    pub start_transaction_requests: u64,
    pub accepted_start_transaction_requests: u64,
    pub rejected_start_transaction_requests: u64,
    pub stop_transaction_requests: u64,
    pub accepted_stop_transaction_requests: u64,
    pub rejected_stop_transaction_requests: u64,
    pub skipped_consecutive_transactions: u64,
    pub skipped_transactions: u64,
    pub start_date: Option<DateTime<Utc>>,
    pub last_run_date: Option<DateTime<Utc>>,
    pub stop_date: Option<DateTime<Utc>>,
    pub stopped_date: Option<DateTime<Utc>>,
}

struct ConnectorRuntime {
    running: Arc<AtomicBool>,
    counters: Arc<Mutex<AtgCounters>>,
    task: JoinHandle<()>,
}

/// Owns the ATG loops for every connector of one station.
pub struct Atg {
    engine: EngineHandle,
    config: AutomaticTransactionGeneratorConfig,
    id_tags: SharedIdTagsCache,
    runtimes: Mutex<HashMap<u32, ConnectorRuntime>>,
}

impl Atg {
    pub fn new(engine: EngineHandle, config: AutomaticTransactionGeneratorConfig, id_tags: SharedIdTagsCache) -> Self {
        Self { engine, config, id_tags, runtimes: Mutex::new(HashMap::new()) }
    }

    /// Starts the loop for every connector id listed, or resumes it if
    /// already running but paused. `connector_ids` empty means "every
    /// connector already known to this ATG" (spec.md §9's union reading
    /// of `startAutomaticTransactionGenerator`); the caller is expected to
    /// pass the station's full connector set in that case.
    pub fn start(self: &Arc<Self>, connector_ids: &[u32]) {
        let mut runtimes = self.runtimes.lock().unwrap();
        for &connector_id in connector_ids {
            if let Some(existing) = runtimes.get(&connector_id) {
                existing.running.store(true, Ordering::SeqCst);
                continue;
            }
            let running = Arc::new(AtomicBool::new(true));
            let counters = Arc::new(Mutex::new(AtgCounters { start_date: Some(Utc::now()), ..Default::default() }));
            let task = tokio::spawn(Self::run_connector(
                connector_id,
                self.engine.clone(),
                self.config.clone(),
                self.id_tags.clone(),
                running.clone(),
                counters.clone(),
            ));
            runtimes.insert(connector_id, ConnectorRuntime { running, counters, task });
        }
    }

    /// Cooperative stop: flips the gate off for the listed connectors (or
    /// every connector if `None`). The loop exits at its next guard check,
    /// never mid-transaction.
    pub fn stop(&self, connector_ids: Option<&[u32]>) {
        let runtimes = self.runtimes.lock().unwrap();
        match connector_ids {
            Some(ids) => {
                for id in ids {
                    if let Some(rt) = runtimes.get(id) {
                        rt.running.store(false, Ordering::SeqCst);
                    }
                }
            }
            None => {
                for rt in runtimes.values() {
                    rt.running.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    /// Aborts every loop outright. Only for whole-station teardown
    /// (`StationEngine` reset/stop), where waiting for a cooperative exit
    /// would block shutdown on an in-flight `sleep`.
    pub fn abort_all(&self) {
        let mut runtimes = self.runtimes.lock().unwrap();
        for (_, rt) in runtimes.drain() {
            rt.task.abort();
        }
    }

    pub fn counters(&self, connector_id: u32) -> Option<AtgCounters> {
        self.runtimes.lock().unwrap().get(&connector_id).map(|rt| rt.counters.lock().unwrap().clone())
    }

    async fn run_connector(
        connector_id: u32,
        engine: EngineHandle,
        config: AutomaticTransactionGeneratorConfig,
        id_tags: SharedIdTagsCache,
        running: Arc<AtomicBool>,
        counters: Arc<Mutex<AtgCounters>>,
    ) {
        // stopAfterHours horizon, resumed rather than extended on restart:
        // a connector stopped and restarted keeps counting down from its
        // original startDate.
        let stop_date = Utc::now() + chrono::Duration::milliseconds((config.stop_after_hours * 3_600_000.0) as i64);
        counters.lock().unwrap().stop_date = Some(stop_date);
        info!(connector_id, %stop_date, "ATG loop starting");

        loop {
            if Utc::now() > stop_date {
                info!(connector_id, "ATG horizon reached, stopping");
                break;
            }
            if !running.load(Ordering::SeqCst) {
                info!(connector_id, "ATG stopped on connector");
                break;
            }

            let wait_s = bounded_rand_u64(config.min_delay_between_two_transactions, config.max_delay_between_two_transactions);
            tokio::time::sleep(Duration::from_secs(wait_s)).await;

            if !running.load(Ordering::SeqCst) {
                break;
            }

            if rand::thread_rng().gen_range(0.0..1.0) < config.probability_of_start {
                Self::run_transaction(connector_id, &engine, &config, &id_tags, &counters).await;
            } else {
                let mut c = counters.lock().unwrap();
                c.skipped_consecutive_transactions += 1;
                c.skipped_transactions += 1;
            }

            counters.lock().unwrap().last_run_date = Some(Utc::now());
        }

        counters.lock().unwrap().stopped_date = Some(Utc::now());
    }

    /// One attempted transaction: pick an id tag, start, hold, stop.
    ///
    /// `requireAuthorize` only gates which counter bucket a rejection
    /// lands in here — the engine itself decides whether an `Authorize`
    /// call actually goes out, via `EngineConfig::authorize_remote_tx_requests`,
    /// since `StartTransaction` is the engine's single atomic entry point
    /// for "authorize then start".
    async fn run_transaction(
        connector_id: u32,
        engine: &EngineHandle,
        config: &AutomaticTransactionGeneratorConfig,
        id_tags: &SharedIdTagsCache,
        counters: &Arc<Mutex<AtgCounters>>,
    ) {
        let id_tag = id_tags.pick(config.id_tag_distribution, connector_id);
        {
            let mut c = counters.lock().unwrap();
            c.skipped_consecutive_transactions = 0;
            if config.require_authorize {
                c.authorize_requests += 1;
            }
            c.start_transaction_requests += 1;
        }

        let start_result = engine.send(EngineCommand::StartTransaction { connector_id, id_tag }).await;
        match start_result {
            Ok(()) => {
                {
                    let mut c = counters.lock().unwrap();
                    if config.require_authorize {
                        c.accepted_authorize_requests += 1;
                    }
                    c.accepted_start_transaction_requests += 1;
                }

                let hold_s = bounded_rand_u64(config.min_duration_of_transaction, config.max_duration_of_transaction);
                tokio::time::sleep(Duration::from_secs(hold_s)).await;

                counters.lock().unwrap().stop_transaction_requests += 1;
                let stop_result = engine.send(EngineCommand::StopTransaction { connector_id, reason: "Local".into() }).await;
                let mut c = counters.lock().unwrap();
                match stop_result {
                    Ok(()) => c.accepted_stop_transaction_requests += 1,
                    Err(err) => {
                        warn!(connector_id, error = %err, "ATG StopTransaction rejected");
                        c.rejected_stop_transaction_requests += 1;
                    }
                }
            }
            Err(err) => {
                warn!(connector_id, error = %err, "ATG StartTransaction rejected");
                let mut c = counters.lock().unwrap();
                if config.require_authorize && matches!(err, StationError::NotAuthorized(_)) {
                    c.rejected_authorize_requests += 1;
                } else {
                    c.rejected_start_transaction_requests += 1;
                }
            }
        }
    }
}

/// `rand(min, max)` per spec.md §4.3, tolerant of a template where
/// `max < min`.
fn bounded_rand_u64(min: u64, max: u64) -> u64 {
    if max <= min {
        min
    } else {
        rand::thread_rng().gen_range(min..=max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_rand_handles_inverted_bounds() {
        assert_eq!(bounded_rand_u64(30, 15), 30);
    }

    #[test]
    fn bounded_rand_stays_in_range() {
        for _ in 0..50 {
            let v = bounded_rand_u64(10, 20);
            assert!((10..=20).contains(&v));
        }
    }

    #[test]
    fn counters_default_to_zero() {
        let c = AtgCounters::default();
        assert_eq!(c.start_transaction_requests, 0);
        assert_eq!(c.skipped_transactions, 0);
    }
}
