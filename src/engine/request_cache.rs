//! Outstanding-request cache, per spec.md §3 `CachedRequest` / §4.1
//! "Outbound message flow".
//!
//! Keyed by OCPP message id (UUID v4). At most one entry per id at a time;
//! an entry is removed before its callback returns, or when its deadline
//! fires, whichever comes first.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::StationError;

/// Default per-request timeout, per spec.md §5 `OCPP_WS_COMMAND_TIMEOUT`.
pub const OCPP_WS_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

pub type RequestOutcome = Result<Value, StationError>;

struct CachedRequest {
    command_name: String,
    #[allow(dead_code)]
    request_payload: Value,
    deadline: Instant,
    reply: oneshot::Sender<RequestOutcome>,
}

/// Per-station map of in-flight requests awaiting a CALLRESULT/CALLERROR.
#[derive(Default)]
pub struct RequestCache {
    entries: HashMap<String, CachedRequest>,
}

impl RequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new in-flight request; returns a receiver that resolves
    /// on CALLRESULT/CALLERROR or when `take_timed_out` reaps it.
    pub fn insert(
        &mut self,
        message_id: String,
        command_name: impl Into<String>,
        request_payload: Value,
        timeout: Duration,
    ) -> oneshot::Receiver<RequestOutcome> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            message_id,
            CachedRequest {
                command_name: command_name.into(),
                request_payload,
                deadline: Instant::now() + timeout,
                reply: tx,
            },
        );
        rx
    }

    /// Resolve a CALLRESULT: removes the entry and fires its callback.
    pub fn resolve(&mut self, message_id: &str, payload: Value) -> Result<(), StationError> {
        match self.entries.remove(message_id) {
            Some(entry) => {
                let _ = entry.reply.send(Ok(payload));
                Ok(())
            }
            None => Err(StationError::Protocol(format!(
                "CALLRESULT for unknown message id {message_id}"
            ))),
        }
    }

    /// Resolve a CALLERROR: removes the entry and fires its error callback.
    pub fn reject(&mut self, message_id: &str, error_code: &str, description: &str) -> Result<(), StationError> {
        match self.entries.remove(message_id) {
            Some(entry) => {
                let _ = entry
                    .reply
                    .send(Err(StationError::Protocol(format!("{error_code}: {description}"))));
                Ok(())
            }
            None => Err(StationError::Protocol(format!(
                "CALLERROR for unknown message id {message_id}"
            ))),
        }
    }

    /// Fire every in-flight request's error callback (used on close/stop),
    /// draining the cache.
    pub fn cancel_all(&mut self, reason: &str) {
        for (_, entry) in self.entries.drain() {
            let _ = entry.reply.send(Err(StationError::Protocol(reason.to_string())));
        }
    }

    /// Reap entries whose deadline has passed, firing `REQUEST_TIMEOUT`.
    pub fn reap_timeouts(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some(entry) = self.entries.remove(&id) {
                let _ = entry
                    .reply
                    .send(Err(StationError::RequestTimeout(OCPP_WS_COMMAND_TIMEOUT)));
            }
        }
    }

    pub fn command_name(&self, message_id: &str) -> Option<&str> {
        self.entries.get(message_id).map(|e| e.command_name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_fires_callback_and_removes_entry() {
        let mut cache = RequestCache::new();
        let rx = cache.insert("id-1".into(), "Heartbeat", serde_json::json!({}), Duration::from_secs(5));
        cache.resolve("id-1", serde_json::json!({"currentTime": "now"})).unwrap();
        assert!(cache.is_empty());
        let outcome = rx.await.unwrap();
        assert!(outcome.is_ok());
    }

    #[test]
    fn resolve_unknown_id_is_protocol_error() {
        let mut cache = RequestCache::new();
        let err = cache.resolve("nope", serde_json::json!({})).unwrap_err();
        assert!(matches!(err, StationError::Protocol(_)));
    }

    #[tokio::test]
    async fn reap_timeouts_fires_request_timeout() {
        let mut cache = RequestCache::new();
        let rx = cache.insert("id-2".into(), "Heartbeat", serde_json::json!({}), Duration::from_millis(0));
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.reap_timeouts();
        assert!(cache.is_empty());
        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, Err(StationError::RequestTimeout(_))));
    }

    #[tokio::test]
    async fn cancel_all_drains_and_errors_everything() {
        let mut cache = RequestCache::new();
        let rx1 = cache.insert("a".into(), "Heartbeat", serde_json::json!({}), Duration::from_secs(5));
        let rx2 = cache.insert("b".into(), "MeterValues", serde_json::json!({}), Duration::from_secs(5));
        cache.cancel_all("connection closed");
        assert!(cache.is_empty());
        assert!(rx1.await.unwrap().is_err());
        assert!(rx2.await.unwrap().is_err());
    }
}
