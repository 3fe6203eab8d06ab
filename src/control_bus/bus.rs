//! In-process control-plane bus, per spec.md §4.5 / §9 "BroadcastChannel".
//!
//! Grounded on the teacher's `application::events::EventBus`: a
//! `tokio::sync::broadcast` channel WorkerHosts subscribe to, generalized
//! with a correlation-id fan-in so the UIServer can aggregate partial
//! fan-out failures instead of only fanning out.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::messages::{ControlRequest, ControlRequestPayload, FanOutAggregate, Procedure, StationReply};
use crate::error::ControlBusError;

const REQUEST_CHANNEL_CAPACITY: usize = 1024;

/// Server-side fan-out timeout, per spec.md §4.5.
pub const FAN_OUT_TIMEOUT: Duration = Duration::from_secs(120);

/// Typed request/response bus between the UIServer and every WorkerHost.
pub struct ControlBus {
    requests: broadcast::Sender<ControlRequest>,
    reply_routers: DashMap<Uuid, mpsc::UnboundedSender<StationReply>>,
}

pub type SharedControlBus = Arc<ControlBus>;

impl ControlBus {
    pub fn new() -> Self {
        let (requests, _) = broadcast::channel(REQUEST_CHANNEL_CAPACITY);
        Self {
            requests,
            reply_routers: DashMap::new(),
        }
    }

    pub fn shared() -> SharedControlBus {
        Arc::new(Self::new())
    }

    /// WorkerHosts subscribe once at startup and filter by procedure /
    /// target set themselves.
    pub fn subscribe(&self) -> broadcast::Receiver<ControlRequest> {
        self.requests.subscribe()
    }

    /// Publish a request without waiting for replies (fire-and-forget —
    /// used for `START_SIMULATOR`/`STOP_SIMULATOR` broadcast notifications).
    pub fn publish(&self, procedure: Procedure, payload: ControlRequestPayload) -> Uuid {
        let uuid = Uuid::new_v4();
        let request = ControlRequest { uuid, procedure, payload };
        if self.requests.send(request).is_err() {
            debug!(%uuid, ?procedure, "control request published with no subscribers");
        }
        uuid
    }

    /// A WorkerHost (or the owning StationEngine) calls this once per
    /// targeted station to deliver its reply back to the aggregator
    /// waiting on `uuid`, if one is still registered.
    pub fn reply(&self, uuid: Uuid, reply: StationReply) {
        if let Some(router) = self.reply_routers.get(&uuid) {
            let _ = router.send(reply);
        }
    }

    /// Publish a request and block until every targeted station has
    /// replied or the fan-out timeout elapses, per spec.md §4.5 and the
    /// §8 testable property on fan-out completeness.
    pub async fn request_and_aggregate(
        &self,
        procedure: Procedure,
        payload: ControlRequestPayload,
        fleet_hash_ids: &HashSet<String>,
    ) -> Result<FanOutAggregate, ControlBusError> {
        let targets = payload.target_hash_ids();
        let expected: HashSet<String> = if targets.is_empty() {
            fleet_hash_ids.clone()
        } else {
            targets.into_iter().collect()
        };

        if expected.is_empty() {
            return Err(ControlBusError::NoTargets);
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let uuid = Uuid::new_v4();
        self.reply_routers.insert(uuid, tx);

        let request = ControlRequest {
            uuid,
            procedure,
            payload,
        };
        if self.requests.send(request).is_err() {
            self.reply_routers.remove(&uuid);
            return Err(ControlBusError::StationOffline("no worker hosts subscribed".to_string()));
        }

        let mut replies = Vec::with_capacity(expected.len());
        let deadline = tokio::time::Instant::now() + FAN_OUT_TIMEOUT;
        while replies.len() < expected.len() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(reply)) => replies.push(reply),
                Ok(None) => break,
                Err(_) => break,
            }
        }

        self.reply_routers.remove(&uuid);

        let aggregate = FanOutAggregate::build(&expected, replies);
        if aggregate.status == "FAILURE" && aggregate.hash_ids_succeeded.is_empty() {
            warn!(%uuid, ?procedure, "fan-out request: every target failed or timed out");
        }
        Ok(aggregate)
    }
}

impl Default for ControlBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn aggregate_succeeds_when_every_target_replies() {
        let bus = ControlBus::new();
        let mut sub = bus.subscribe();

        let fleet: HashSet<String> = ["h-A".to_string()].into_iter().collect();
        let payload = ControlRequestPayload::default();

        let bus = Arc::new(bus);
        let bus_for_task = bus.clone();
        tokio::spawn(async move {
            if let Ok(req) = sub.recv().await {
                bus_for_task.reply(req.uuid, StationReply::success("h-A"));
            }
        });

        let aggregate = bus.request_and_aggregate(Procedure::StartChargingStation, payload, &fleet).await.unwrap();
        assert_eq!(aggregate.status, "SUCCESS");
    }

    #[tokio::test]
    async fn no_targets_is_an_error() {
        let bus = ControlBus::new();
        let fleet: HashSet<String> = HashSet::new();
        let err = bus
            .request_and_aggregate(Procedure::ListChargingStations, ControlRequestPayload::default(), &fleet)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlBusError::NoTargets));
    }
}
