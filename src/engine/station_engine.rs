//! `StationEngine`: the per-station protocol actor, per spec.md §4.1.
//!
//! One station runs as one cooperative tokio task. Its WebSocket reader
//! runs as a second, short-lived task per connection attempt (spawned by
//! `open_and_boot`, torn down on disconnect) so that a pending
//! `send_and_await` can be resolved by an inbound CALLRESULT while the
//! main task is itself suspended awaiting it — the same "one event loop,
//! message handlers interleave with pending promises" shape the teacher's
//! session model assumes, expressed here as two tasks sharing a
//! `RequestCache` behind a `tokio::sync::Mutex` rather than one thread
//! servicing both a callback queue and a promise.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rust_ocpp::v1_6::types::{ChargePointErrorCode, FirmwareStatus};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::connector::{Availability, ConnectorStatusV16};
use crate::domain::reservation::Reservation;
use crate::domain::station::{BootNotificationResult, RegistrationStatus, Station};
use crate::domain::version::OcppVersion;
use crate::engine::meter::{periodic_meter_value, MeterSampleSpec};
use crate::engine::request_cache::{RequestCache, OCPP_WS_COMMAND_TIMEOUT};
use crate::error::StationError;
use crate::ocpp::schema::SchemaRegistry;
use crate::ocpp::{v16, v201, EngineAction, IncomingOutcome, ResetKind, TriggerMessageKind};
use crate::support::ocpp_frame::OcppFrame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Runtime parameters derived from configuration/template at station
/// construction time (spec.md §4.1 initialization).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `-1` retries forever, `0` gives up after the first rejection.
    pub registration_max_retries: i64,
    /// `-1` unlimited, `0` disabled.
    pub auto_reconnect_max_retries: i64,
    pub reconnect_exponential_delay: bool,
    pub connection_timeout_s: u64,
    pub websocket_ping_interval_s: u64,
    pub payload_schema_validation: bool,
    pub authorize_remote_tx_requests: bool,
    pub meter_value_sample_interval_ms: u64,
    pub custom_value_limitation: bool,
    pub fluctuation_pct: f64,
    pub include_voltage: bool,
    pub include_power: bool,
    pub include_current: bool,
    pub include_l_l_voltages: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            registration_max_retries: -1,
            auto_reconnect_max_retries: -1,
            reconnect_exponential_delay: false,
            connection_timeout_s: 30,
            websocket_ping_interval_s: 60,
            payload_schema_validation: true,
            authorize_remote_tx_requests: true,
            meter_value_sample_interval_ms: 60_000,
            custom_value_limitation: true,
            fluctuation_pct: 5.0,
            include_voltage: true,
            include_power: true,
            include_current: true,
            include_l_l_voltages: false,
        }
    }
}

/// Commands the rest of the process (`ControlBus`, `WorkerHost`, `Atg`)
/// issues against a running station.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Start,
    Stop { reason: String },
    Reset { kind: ResetKind },
    StartTransaction { connector_id: u32, id_tag: String },
    StopTransaction { connector_id: u32, reason: String },
    SetStatus { connector_id: u32, status: ConnectorStatusV16 },
    SetFirmwareStatus { status: FirmwareStatus },
    AddReservation(Reservation),
    RemoveReservation { connector_id: u32 },
    Authorize { id_tag: String },
    DataTransfer { vendor_id: String, message_id: Option<String>, data: Option<String> },
    Trigger { message: TriggerMessageKind, connector_id: Option<u32> },
    SetSupervisionUrls { urls: Vec<String> },
}

struct EngineCommandEnvelope {
    command: EngineCommand,
    reply: Option<oneshot::Sender<Result<(), StationError>>>,
}

/// A cheap, cloneable reference to a running `StationEngine`'s command
/// channel.
#[derive(Clone)]
pub struct EngineHandle {
    pub hash_id: String,
    pub charging_station_id: String,
    commands: mpsc::Sender<EngineCommandEnvelope>,
}

impl EngineHandle {
    /// Send a command and await its completion.
    pub async fn send(&self, command: EngineCommand) -> Result<(), StationError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EngineCommandEnvelope { command, reply: Some(tx) })
            .await
            .map_err(|_| StationError::State("station engine task is no longer running".into()))?;
        rx.await.map_err(|_| StationError::State("station engine dropped the reply channel".into()))?
    }

    /// Enqueue a command without waiting for completion.
    pub fn fire_and_forget(&self, command: EngineCommand) {
        let sender = self.commands.clone();
        tokio::spawn(async move {
            let _ = sender.send(EngineCommandEnvelope { command, reply: None }).await;
        });
    }
}

/// Inbound events the reader task hands back to the main engine loop.
enum ReaderEvent {
    Call { message_id: String, action: String, payload: Value },
    Closed { code: Option<u16> },
}

enum ServeOutcome {
    StoppedByCommand,
    Reconnect,
}

pub struct StationEngine {
    station: Station,
    config: EngineConfig,
    schemas: Arc<SchemaRegistry>,
    supervision_urls: Vec<String>,
    supervision_url_index: usize,
    request_cache: Arc<Mutex<RequestCache>>,
    ws_sink: Option<SplitSink<WsStream, WsMessage>>,
    /// Outbound CALLs that could not be written because the socket dropped
    /// mid-flight; resent, in order, once a new connection opens.
    message_buffer: VecDeque<(String, String, Value)>,
}

impl StationEngine {
    /// Spawn the station's task and return a handle to it. The station
    /// does nothing until `EngineCommand::Start` is sent.
    pub fn spawn(
        station: Station,
        config: EngineConfig,
        schemas: Arc<SchemaRegistry>,
        supervision_urls: Vec<String>,
    ) -> EngineHandle {
        let (tx, rx) = mpsc::channel(64);
        let hash_id = station.hash_id.clone();
        let charging_station_id = station.charging_station_id.clone();
        let engine = StationEngine {
            station,
            config,
            schemas,
            supervision_urls,
            supervision_url_index: 0,
            request_cache: Arc::new(Mutex::new(RequestCache::new())),
            ws_sink: None,
            message_buffer: VecDeque::new(),
        };
        tokio::spawn(engine.run(rx));
        EngineHandle { hash_id, charging_station_id, commands: tx }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<EngineCommandEnvelope>) {
        while let Some(env) = commands.recv().await {
            match env.command {
                EngineCommand::Start => {
                    self.station.started = true;
                    self.station.starting = false;
                    if let Some(reply) = env.reply {
                        let _ = reply.send(Ok(()));
                    }
                    self.connection_loop(&mut commands).await;
                }
                _ => {
                    if let Some(reply) = env.reply {
                        let _ = reply.send(Err(StationError::State("station is not started".into())));
                    }
                }
            }
        }
    }

    /// Connect, boot, serve, and — unless stopped or out of retries —
    /// reconnect, forever, per spec.md §4.1's reconnect policy.
    async fn connection_loop(&mut self, commands: &mut mpsc::Receiver<EngineCommandEnvelope>) {
        loop {
            let mut incoming_rx = match self.open_and_boot().await {
                Ok(rx) => rx,
                Err(err) => {
                    warn!(hash_id = %self.station.hash_id, error = %err, "boot sequence failed, station stopping");
                    self.station.started = false;
                    return;
                }
            };

            let outcome = self.serve(commands, &mut incoming_rx).await;
            self.request_cache.lock().await.cancel_all("connection closed");
            self.close_ws().await;

            match outcome {
                ServeOutcome::StoppedByCommand => {
                    self.station.started = false;
                    self.station.stopping = false;
                    return;
                }
                ServeOutcome::Reconnect => {
                    if !self.should_reconnect() {
                        warn!(hash_id = %self.station.hash_id, "reconnect budget exhausted, station stopping");
                        self.station.started = false;
                        return;
                    }
                    self.station.auto_reconnect_retry_count += 1;
                    self.station.ws_connection_restarted = true;
                    let delay = self.reconnect_delay();
                    info!(hash_id = %self.station.hash_id, delay_ms = delay.as_millis() as u64, "reconnecting");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        maybe_env = commands.recv() => {
                            match maybe_env {
                                Some(env) if matches!(env.command, EngineCommand::Stop { .. }) => {
                                    if let Some(reply) = env.reply {
                                        let _ = reply.send(Ok(()));
                                    }
                                    self.station.started = false;
                                    return;
                                }
                                Some(env) => {
                                    if let Some(reply) = env.reply {
                                        let _ = reply.send(Err(StationError::State("station is reconnecting".into())));
                                    }
                                }
                                None => return,
                            }
                        }
                    }
                }
            }
        }
    }

    async fn open_and_boot(&mut self) -> Result<mpsc::UnboundedReceiver<ReaderEvent>, StationError> {
        let url = self.next_supervision_url();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| StationError::WebSocket(e.to_string()))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_str(self.station.ocpp_version.subprotocol())
                .map_err(|e| StationError::WebSocket(e.to_string()))?,
        );

        let (stream, _response) = tokio::time::timeout(
            Duration::from_secs(self.config.connection_timeout_s.max(1)),
            connect_async(request),
        )
        .await
        .map_err(|_| StationError::RequestTimeout(Duration::from_secs(self.config.connection_timeout_s)))?
        .map_err(|e| StationError::WebSocket(e.to_string()))?;

        let (sink, stream) = stream.split();
        self.ws_sink = Some(sink);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::read_loop(stream, self.request_cache.clone(), events_tx));

        self.perform_boot_sequence().await?;
        self.flush_message_buffer().await;

        Ok(events_rx)
    }

    async fn read_loop(
        mut stream: SplitStream<WsStream>,
        request_cache: Arc<Mutex<RequestCache>>,
        events: mpsc::UnboundedSender<ReaderEvent>,
    ) {
        while let Some(frame) = stream.next().await {
            let message = match frame {
                Ok(m) => m,
                Err(err) => {
                    warn!(error = %err, "websocket read error");
                    let _ = events.send(ReaderEvent::Closed { code: None });
                    return;
                }
            };
            match message {
                WsMessage::Text(text) => match OcppFrame::parse(&text) {
                    Ok(OcppFrame::Call { unique_id, action, payload }) => {
                        let _ = events.send(ReaderEvent::Call { message_id: unique_id, action, payload });
                    }
                    Ok(OcppFrame::CallResult { unique_id, payload }) => {
                        let _ = request_cache.lock().await.resolve(&unique_id, payload);
                    }
                    Ok(OcppFrame::CallError { unique_id, error_code, error_description, .. }) => {
                        let _ = request_cache.lock().await.reject(&unique_id, &error_code, &error_description);
                    }
                    Err(err) => warn!(error = %err, "malformed OCPP-J frame, ignoring"),
                },
                WsMessage::Close(frame) => {
                    let code = frame.map(|f| u16::from(f.code));
                    let _ = events.send(ReaderEvent::Closed { code });
                    return;
                }
                _ => {}
            }
        }
        let _ = events.send(ReaderEvent::Closed { code: None });
    }

    async fn serve(
        &mut self,
        commands: &mut mpsc::Receiver<EngineCommandEnvelope>,
        incoming: &mut mpsc::UnboundedReceiver<ReaderEvent>,
    ) -> ServeOutcome {
        let mut heartbeat = interval(Duration::from_secs(self.station.heartbeat_interval_s.max(1)));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        let mut ping = interval(Duration::from_secs(self.config.websocket_ping_interval_s.max(1)));
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping.tick().await;

        let mut meter_tick = interval(Duration::from_millis(self.config.meter_value_sample_interval_ms.max(1)));
        meter_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        meter_tick.tick().await;

        let mut reap = interval(Duration::from_secs(5));
        reap.set_missed_tick_behavior(MissedTickBehavior::Delay);
        reap.tick().await;

        loop {
            tokio::select! {
                event = incoming.recv() => {
                    match event {
                        Some(ReaderEvent::Call { message_id, action, payload }) => {
                            self.handle_incoming_call(message_id, action, payload).await;
                        }
                        Some(ReaderEvent::Closed { code }) => {
                            let graceful = self.station.stopping && matches!(code, Some(1000) | Some(1005) | None);
                            if graceful {
                                return ServeOutcome::StoppedByCommand;
                            }
                            warn!(hash_id = %self.station.hash_id, ?code, "connection closed");
                            return ServeOutcome::Reconnect;
                        }
                        None => return ServeOutcome::Reconnect,
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(err) = self.send_heartbeat().await {
                        warn!(hash_id = %self.station.hash_id, error = %err, "heartbeat failed");
                        return ServeOutcome::Reconnect;
                    }
                }
                _ = ping.tick() => {
                    if let Some(sink) = self.ws_sink.as_mut() {
                        if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                            return ServeOutcome::Reconnect;
                        }
                    }
                }
                _ = meter_tick.tick() => {
                    self.emit_meter_values().await;
                }
                _ = reap.tick() => {
                    self.request_cache.lock().await.reap_timeouts();
                }
                maybe_env = commands.recv() => {
                    match maybe_env {
                        Some(env) => {
                            let result = self.handle_command(env.command).await;
                            if let Some(reply) = env.reply {
                                let _ = reply.send(result);
                            }
                        }
                        None => return ServeOutcome::StoppedByCommand,
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, command: EngineCommand) -> Result<(), StationError> {
        match command {
            EngineCommand::Start => Ok(()),
            EngineCommand::Stop { reason } => {
                info!(hash_id = %self.station.hash_id, %reason, "stop requested");
                self.station.stopping = true;
                self.close_ws().await;
                Ok(())
            }
            EngineCommand::Reset { kind } => self.perform_reset(kind).await,
            EngineCommand::StartTransaction { connector_id, id_tag } => self.start_transaction(connector_id, &id_tag).await,
            EngineCommand::StopTransaction { connector_id, reason } => self.stop_transaction(connector_id, &reason).await,
            EngineCommand::SetStatus { connector_id, status } => self.set_status(connector_id, status).await,
            EngineCommand::SetFirmwareStatus { status } => self.set_firmware_status(status).await,
            EngineCommand::AddReservation(reservation) => self.add_reservation(reservation),
            EngineCommand::RemoveReservation { connector_id } => self.remove_reservation(connector_id),
            EngineCommand::Authorize { id_tag } => self.send_authorize(&id_tag).await,
            EngineCommand::DataTransfer { vendor_id, message_id, data } => {
                self.send_data_transfer(&vendor_id, message_id.as_deref(), data.as_deref()).await
            }
            EngineCommand::Trigger { message, connector_id } => {
                self.send_triggered_message(message, connector_id).await;
                Ok(())
            }
            EngineCommand::SetSupervisionUrls { urls } => {
                self.supervision_urls = urls;
                self.supervision_url_index = 0;
                Ok(())
            }
        }
    }

    /// Control-plane `AUTHORIZE`: send an `Authorize` request outside the
    /// start-transaction flow, for UI-driven id-tag checks.
    async fn send_authorize(&mut self, id_tag: &str) -> Result<(), StationError> {
        let payload = v16::outgoing::build_authorize(id_tag)?;
        let response = self.send_and_await(v16::outgoing::ACTION_AUTHORIZE, payload, OCPP_WS_COMMAND_TIMEOUT).await?;
        let authorize = v16::outgoing::parse_authorize_response(response)?;
        if matches!(authorize.id_tag_info.status, rust_ocpp::v1_6::types::AuthorizationStatus::Accepted) {
            Ok(())
        } else {
            Err(StationError::NotAuthorized(id_tag.to_string()))
        }
    }

    /// Control-plane `DATA_TRANSFER`: send an ad hoc vendor data transfer.
    async fn send_data_transfer(&mut self, vendor_id: &str, message_id: Option<&str>, data: Option<&str>) -> Result<(), StationError> {
        let payload = v16::outgoing::build_data_transfer(vendor_id, message_id, data)?;
        let response = self.send_and_await(v16::outgoing::ACTION_DATA_TRANSFER, payload, OCPP_WS_COMMAND_TIMEOUT).await?;
        let result = v16::outgoing::parse_data_transfer_response(response)?;
        if v16::outgoing::data_transfer_accepted(result.status) {
            Ok(())
        } else {
            Err(StationError::Protocol("DataTransfer rejected by CSMS".into()))
        }
    }

    async fn close_ws(&mut self) {
        if let Some(sink) = self.ws_sink.as_mut() {
            let _ = sink.close().await;
        }
        self.ws_sink = None;
    }

    async fn write_ws_text(&mut self, text: &str) -> Result<(), StationError> {
        let sink = self.ws_sink.as_mut().ok_or_else(|| StationError::WebSocket("not connected".into()))?;
        sink.send(WsMessage::Text(text.to_string())).await.map_err(|e| StationError::WebSocket(e.to_string()))
    }

    async fn send_and_await(&mut self, action: &str, payload: Value, timeout: Duration) -> Result<Value, StationError> {
        if self.config.payload_schema_validation {
            self.schemas.validate(self.station.ocpp_version, action, &payload)?;
        }
        let message_id = Uuid::new_v4().to_string();
        let rx = {
            let mut cache = self.request_cache.lock().await;
            cache.insert(message_id.clone(), action, payload.clone(), timeout)
        };
        let frame = OcppFrame::Call { unique_id: message_id.clone(), action: action.to_string(), payload: payload.clone() };
        if self.write_ws_text(&frame.serialize()).await.is_err() {
            self.message_buffer.push_back((message_id, action.to_string(), payload));
        }
        rx.await.map_err(|_| StationError::Protocol("request cache sender dropped".into()))?
    }

    async fn flush_message_buffer(&mut self) {
        let pending: Vec<_> = self.message_buffer.drain(..).collect();
        for (message_id, action, payload) in pending {
            let frame = OcppFrame::Call { unique_id: message_id, action, payload };
            let _ = self.write_ws_text(&frame.serialize()).await;
        }
    }

    async fn handle_incoming_call(&mut self, message_id: String, action: String, payload: Value) {
        if self.config.payload_schema_validation {
            if let Err(err) = self.schemas.validate(self.station.ocpp_version, &action, &payload) {
                let _ = self
                    .write_ws_text(&OcppFrame::error_response(message_id, "FormationViolation", err.to_string()).serialize())
                    .await;
                return;
            }
        }
        let outcome = match self.station.ocpp_version {
            OcppVersion::V16 => v16::incoming::handle(&mut self.station, &action, payload),
            OcppVersion::V201 => v201::incoming::handle(&action, payload),
        };
        match outcome {
            Ok(IncomingOutcome { response, engine_action }) => {
                let _ = self
                    .write_ws_text(&OcppFrame::CallResult { unique_id: message_id, payload: response }.serialize())
                    .await;
                if let Some(action) = engine_action {
                    self.apply_engine_action(action).await;
                }
            }
            Err(err) => {
                let _ = self
                    .write_ws_text(&OcppFrame::error_response(message_id, "InternalError", err.to_string()).serialize())
                    .await;
            }
        }
    }

    async fn apply_engine_action(&mut self, action: EngineAction) {
        match action {
            EngineAction::Reset { kind } => {
                if let Err(err) = self.perform_reset(kind).await {
                    warn!(hash_id = %self.station.hash_id, error = %err, "reset failed");
                }
            }
            EngineAction::RemoteStartTransaction { connector_id, id_tag } => {
                let target = connector_id.or_else(|| {
                    self.station
                        .topology
                        .flat_connector_ids()
                        .into_iter()
                        .find(|&id| self.station.topology.connector(id).map(|c| c.is_available_for_start()).unwrap_or(false))
                });
                match target {
                    Some(id) => {
                        if let Err(err) = self.start_transaction(id, &id_tag).await {
                            warn!(hash_id = %self.station.hash_id, error = %err, "RemoteStartTransaction failed");
                        }
                    }
                    None => warn!(hash_id = %self.station.hash_id, "RemoteStartTransaction: no available connector"),
                }
            }
            EngineAction::RemoteStopTransaction { transaction_id } => {
                let target = self
                    .station
                    .topology
                    .flat_connector_ids()
                    .into_iter()
                    .find(|&id| self.station.topology.connector(id).and_then(|c| c.transaction_id) == Some(transaction_id));
                match target {
                    Some(id) => {
                        if let Err(err) = self.stop_transaction(id, "Remote").await {
                            warn!(hash_id = %self.station.hash_id, error = %err, "RemoteStopTransaction failed");
                        }
                    }
                    None => warn!(hash_id = %self.station.hash_id, transaction_id, "RemoteStopTransaction: unknown transaction"),
                }
            }
            EngineAction::TriggerMessage { message, connector_id } => {
                self.send_triggered_message(message, connector_id).await;
            }
            EngineAction::GetDiagnostics { location } => {
                info!(hash_id = %self.station.hash_id, %location, "GetDiagnostics acknowledged, upload not simulated");
            }
            EngineAction::UpdateFirmware { location, retrieve_date } => {
                info!(hash_id = %self.station.hash_id, %location, %retrieve_date, "UpdateFirmware acknowledged, download not simulated");
            }
        }
    }

    async fn send_triggered_message(&mut self, message: TriggerMessageKind, connector_id: Option<u32>) {
        let result = match message {
            TriggerMessageKind::Heartbeat => self.send_heartbeat().await,
            TriggerMessageKind::MeterValues => {
                self.emit_meter_values().await;
                Ok(())
            }
            TriggerMessageKind::StatusNotification => {
                let ids = connector_id.map(|id| vec![id]).unwrap_or_else(|| self.station.topology.flat_connector_ids());
                for id in ids {
                    if let Err(err) = self.send_status_notification(id).await {
                        warn!(hash_id = %self.station.hash_id, error = %err, "triggered StatusNotification failed");
                    }
                }
                Ok(())
            }
            TriggerMessageKind::BootNotification => self.perform_boot_sequence().await,
            TriggerMessageKind::DiagnosticsStatusNotification | TriggerMessageKind::FirmwareStatusNotification => Ok(()),
        };
        if let Err(err) = result {
            warn!(hash_id = %self.station.hash_id, error = %err, "triggered message failed");
        }
    }

    fn build_boot_notification(&self) -> Result<(&'static str, Value), StationError> {
        match self.station.ocpp_version {
            OcppVersion::V16 => {
                let payload = v16::outgoing::build_boot_notification(
                    &self.station.charge_point_vendor,
                    &self.station.charge_point_model,
                    None,
                    self.station.firmware_version.as_deref(),
                )?;
                Ok((v16::outgoing::ACTION_BOOT_NOTIFICATION, payload))
            }
            OcppVersion::V201 => {
                let payload = v201::outgoing::build_boot_notification(
                    &self.station.charge_point_vendor,
                    &self.station.charge_point_model,
                    None,
                    v201::outgoing::BootReason::PowerUp,
                );
                Ok((v201::outgoing::ACTION_BOOT_NOTIFICATION, payload))
            }
        }
    }

    fn parse_boot_notification(&self, payload: Value) -> Result<(RegistrationStatus, u64), StationError> {
        match self.station.ocpp_version {
            OcppVersion::V16 => {
                let response = v16::outgoing::parse_boot_notification_response(payload)?;
                let status = convert_registration_status_v16(response.status);
                Ok((status, (response.interval.max(0)) as u64))
            }
            OcppVersion::V201 => {
                let response = v201::outgoing::parse_boot_notification_response(payload)?;
                let status = match response.get("status").and_then(Value::as_str) {
                    Some("Accepted") => RegistrationStatus::Accepted,
                    Some("Pending") => RegistrationStatus::Pending,
                    _ => RegistrationStatus::Rejected,
                };
                let interval = response.get("interval").and_then(Value::as_u64).unwrap_or(60);
                Ok((status, interval))
            }
        }
    }

    async fn perform_boot_sequence(&mut self) -> Result<(), StationError> {
        let mut attempt: i64 = 0;
        loop {
            attempt += 1;
            let (action, payload) = self.build_boot_notification()?;
            let response_payload = self.send_and_await(action, payload, OCPP_WS_COMMAND_TIMEOUT).await?;
            let (status, interval_s) = self.parse_boot_notification(response_payload)?;
            if status.is_accepted() {
                self.station.heartbeat_interval_s = interval_s.max(1);
                self.station.config_keys.set_heartbeat_interval(self.station.heartbeat_interval_s);
                self.station.boot_notification_response = Some(BootNotificationResult {
                    status,
                    interval: self.station.heartbeat_interval_s,
                    current_time: Utc::now(),
                });
                info!(hash_id = %self.station.hash_id, "BootNotification accepted");
                self.emit_boot_status_notifications().await;
                return Ok(());
            }
            if self.config.registration_max_retries >= 0 && attempt > self.config.registration_max_retries {
                return Err(StationError::Protocol("BootNotification not accepted within retry budget".into()));
            }
            tokio::time::sleep(Duration::from_secs(interval_s.max(1))).await;
        }
    }

    async fn send_heartbeat(&mut self) -> Result<(), StationError> {
        let payload = v16::outgoing::build_heartbeat();
        self.send_and_await(v16::outgoing::ACTION_HEARTBEAT, payload, OCPP_WS_COMMAND_TIMEOUT).await?;
        Ok(())
    }

    async fn send_status_notification(&mut self, connector_id: u32) -> Result<(), StationError> {
        let status_v16 = self
            .station
            .topology
            .connector(connector_id)
            .map(|c| c.status_v16)
            .ok_or(StationError::ConnectorNotFound(connector_id))?;
        match self.station.ocpp_version {
            OcppVersion::V16 => {
                let payload = v16::outgoing::build_status_notification(
                    connector_id,
                    status_v16.to_ocpp(),
                    ChargePointErrorCode::NoError,
                    None,
                    Some(Utc::now()),
                )?;
                self.send_and_await(v16::outgoing::ACTION_STATUS_NOTIFICATION, payload, OCPP_WS_COMMAND_TIMEOUT).await?;
            }
            OcppVersion::V201 => {
                let evse_id = self.evse_id_for_connector(connector_id);
                let status = v201_status_str(status_v16);
                let payload = v201::outgoing::build_status_notification(connector_id, evse_id, status, Utc::now());
                self.send_and_await(v201::outgoing::ACTION_STATUS_NOTIFICATION, payload, OCPP_WS_COMMAND_TIMEOUT).await?;
            }
        }
        Ok(())
    }

    /// Boot step (d): emit the initial per-connector `StatusNotification`
    /// for every physical connector (connector 0, the station-global pseudo
    /// connector from `useConnectorId0`, carries no physical status and is
    /// skipped).
    async fn emit_boot_status_notifications(&mut self) {
        for id in self.station.topology.flat_connector_ids() {
            if id == 0 {
                continue;
            }
            if let Err(err) = self.send_status_notification(id).await {
                warn!(hash_id = %self.station.hash_id, connector_id = id, error = %err, "boot StatusNotification failed");
            }
        }
    }

    /// EVSE a connector belongs to, for v2.0.1's `evseId` field. Flat
    /// topologies have no EVSE grouping, so the connector id stands in.
    fn evse_id_for_connector(&self, connector_id: u32) -> u32 {
        match &self.station.topology {
            crate::domain::evse::ConnectorTopology::Flat(_) => connector_id,
            crate::domain::evse::ConnectorTopology::Grouped(evses) => evses
                .values()
                .find(|e| e.connectors.contains_key(&connector_id))
                .map(|e| e.id)
                .unwrap_or(connector_id),
        }
    }

    async fn emit_meter_values(&mut self) {
        if !self.station.is_registered() {
            return;
        }
        let connector_ids = self.station.topology.flat_connector_ids();
        for id in connector_ids {
            let sample = {
                let Some(connector) = self.station.topology.connector(id) else { continue };
                if !connector.transaction_started {
                    continue;
                }
                (connector.transaction_id, connector.energy_active_import_register_value)
            };
            let (transaction_id, cumulative_wh) = sample;
            let capacity_w = self.station.electrical.per_connector_capacity_w();
            let spec = MeterSampleSpec {
                current_out_type: self.station.electrical.current_out_type,
                number_of_phases: self.station.electrical.number_of_phases,
                voltage_out: self.station.electrical.voltage_out,
                connector_capacity_w: capacity_w,
                cumulative_energy_wh: cumulative_wh,
                power_w: capacity_w * 0.8,
                soc: None,
                fluctuation_pct: self.config.fluctuation_pct,
                include_voltage: self.config.include_voltage,
                include_power: self.config.include_power,
                include_current: self.config.include_current,
                include_l_l_voltages: self.config.include_l_l_voltages,
                custom_value_limitation: self.config.custom_value_limitation,
                transaction_context: true,
            };
            let meter_value = periodic_meter_value(&spec);
            let new_energy = meter_value
                .sampled_value
                .iter()
                .find(|s| s.measurand == Some(rust_ocpp::v1_6::types::Measurand::EnergyActiveImportRegister))
                .and_then(|s| s.value.parse::<f64>().ok())
                .unwrap_or(cumulative_wh);
            if let Some(connector) = self.station.topology.connector_mut(id) {
                connector.energy_active_import_register_value = new_energy;
            }
            match v16::outgoing::build_meter_values(id, transaction_id, vec![meter_value]) {
                Ok(payload) => {
                    if let Err(err) = self.send_and_await(v16::outgoing::ACTION_METER_VALUES, payload, OCPP_WS_COMMAND_TIMEOUT).await {
                        warn!(hash_id = %self.station.hash_id, connector_id = id, error = %err, "MeterValues failed");
                    }
                }
                Err(err) => warn!(hash_id = %self.station.hash_id, error = %err, "failed to build MeterValues payload"),
            }
        }
    }

    async fn perform_reset(&mut self, kind: ResetKind) -> Result<(), StationError> {
        info!(hash_id = %self.station.hash_id, ?kind, "performing reset");
        for id in self.station.topology.flat_connector_ids() {
            if let Some(connector) = self.station.topology.connector_mut(id) {
                connector.transaction_started = false;
                connector.transaction_id = None;
                connector.transaction_id_tag = None;
                connector.transaction_start = None;
            }
        }
        self.station.boot_notification_response = None;
        self.close_ws().await;
        Ok(())
    }

    async fn start_transaction(&mut self, connector_id: u32, id_tag: &str) -> Result<(), StationError> {
        if !self.station.is_registered() {
            return Err(StationError::State("station is not registered with the CSMS".into()));
        }
        {
            let connector = self.station.topology.connector(connector_id).ok_or(StationError::ConnectorNotFound(connector_id))?;
            if !connector.is_available_for_start() {
                return Err(StationError::ConnectorUnavailable(connector_id));
            }
            for sibling in self.station.topology.siblings_of(connector_id) {
                if self.station.topology.connector(sibling).map(|c| c.transaction_started).unwrap_or(false) {
                    return Err(StationError::TransactionAlreadyActive(sibling));
                }
            }
        }

        if self.config.authorize_remote_tx_requests {
            let payload = v16::outgoing::build_authorize(id_tag)?;
            let response = self.send_and_await(v16::outgoing::ACTION_AUTHORIZE, payload, OCPP_WS_COMMAND_TIMEOUT).await?;
            let authorize = v16::outgoing::parse_authorize_response(response)?;
            if !matches!(authorize.id_tag_info.status, rust_ocpp::v1_6::types::AuthorizationStatus::Accepted) {
                return Err(StationError::NotAuthorized(id_tag.to_string()));
            }
        }

        let meter_start = self
            .station
            .topology
            .connector(connector_id)
            .map(|c| c.energy_active_import_register_value as i32)
            .unwrap_or(0);
        let payload = v16::outgoing::build_start_transaction(connector_id, id_tag, meter_start, Utc::now(), None)?;
        let response = self.send_and_await(v16::outgoing::ACTION_START_TRANSACTION, payload, OCPP_WS_COMMAND_TIMEOUT).await?;
        let start_response = v16::outgoing::parse_start_transaction_response(response)?;
        if !matches!(start_response.id_tag_info.status, rust_ocpp::v1_6::types::AuthorizationStatus::Accepted) {
            return Err(StationError::NotAuthorized(id_tag.to_string()));
        }

        let transaction_id = start_response.transaction_id;
        if let Some(connector) = self.station.topology.connector_mut(connector_id) {
            connector.transaction_started = true;
            connector.transaction_id = Some(transaction_id);
            connector.transaction_id_tag = Some(id_tag.to_string());
            connector.transaction_start = Some(Utc::now());
            connector.transaction_energy_active_import_register_value = connector.energy_active_import_register_value;
        }
        self.station.recompute_power_divider_if_shared();
        self.set_status(connector_id, ConnectorStatusV16::Charging).await
    }

    async fn stop_transaction(&mut self, connector_id: u32, reason: &str) -> Result<(), StationError> {
        let (transaction_id, meter_stop, id_tag) = {
            let connector = self.station.topology.connector(connector_id).ok_or(StationError::ConnectorNotFound(connector_id))?;
            let transaction_id = connector.transaction_id.ok_or(StationError::NoActiveTransaction(connector_id))?;
            (transaction_id, connector.energy_active_import_register_value as i32, connector.transaction_id_tag.clone())
        };
        let stop_reason = parse_stop_reason(reason);
        let payload =
            v16::outgoing::build_stop_transaction(transaction_id, meter_stop, Utc::now(), stop_reason, id_tag.as_deref(), None)?;
        self.send_and_await(v16::outgoing::ACTION_STOP_TRANSACTION, payload, OCPP_WS_COMMAND_TIMEOUT).await?;

        if let Some(connector) = self.station.topology.connector_mut(connector_id) {
            connector.transaction_started = false;
            connector.transaction_id = None;
            connector.transaction_id_tag = None;
            connector.transaction_start = None;
            connector.transaction_energy_active_import_register_value = 0.0;
        }
        self.station.recompute_power_divider_if_shared();
        self.set_status(connector_id, ConnectorStatusV16::Finishing).await?;

        // Finishing is transient: per spec.md §4.1, the connector then
        // settles into Available (or Unavailable if its own or the
        // station's availability says otherwise).
        let settled_status = self
            .station
            .topology
            .connector(connector_id)
            .map(|c| match c.availability {
                Availability::Operative => ConnectorStatusV16::Available,
                Availability::Inoperative => ConnectorStatusV16::Unavailable,
            })
            .unwrap_or(ConnectorStatusV16::Available);
        self.set_status(connector_id, settled_status).await
    }

    async fn set_status(&mut self, connector_id: u32, status: ConnectorStatusV16) -> Result<(), StationError> {
        {
            let connector = self.station.topology.connector_mut(connector_id).ok_or(StationError::ConnectorNotFound(connector_id))?;
            if !connector.set_status_v16(status) {
                return Err(StationError::State(format!("illegal transition to {status:?} on connector {connector_id}")));
            }
        }
        self.send_status_notification(connector_id).await
    }

    async fn set_firmware_status(&mut self, status: FirmwareStatus) -> Result<(), StationError> {
        self.station.firmware_status = Some(status);
        let payload = v16::outgoing::build_firmware_status_notification(status)?;
        self.send_and_await(v16::outgoing::ACTION_FIRMWARE_STATUS_NOTIFICATION, payload, OCPP_WS_COMMAND_TIMEOUT)
            .await?;
        Ok(())
    }

    fn add_reservation(&mut self, reservation: Reservation) -> Result<(), StationError> {
        let connector_id = reservation.connector_id;
        let connector = self.station.topology.connector_mut(connector_id).ok_or(StationError::ConnectorNotFound(connector_id))?;
        connector.reservation = Some(reservation);
        Ok(())
    }

    fn remove_reservation(&mut self, connector_id: u32) -> Result<(), StationError> {
        let connector = self.station.topology.connector_mut(connector_id).ok_or(StationError::ConnectorNotFound(connector_id))?;
        connector.reservation = None;
        Ok(())
    }

    fn should_reconnect(&self) -> bool {
        self.config.auto_reconnect_max_retries < 0
            || (self.station.auto_reconnect_retry_count as i64) <= self.config.auto_reconnect_max_retries
    }

    fn reconnect_delay(&self) -> Duration {
        if self.config.reconnect_exponential_delay {
            let exponent = self.station.auto_reconnect_retry_count.min(6);
            Duration::from_millis(500 * 2u64.pow(exponent))
        } else {
            Duration::from_secs(self.config.connection_timeout_s.max(2)) - Duration::from_secs(1)
        }
    }

    fn next_supervision_url(&mut self) -> String {
        if self.supervision_urls.is_empty() {
            return self.station.charging_station_id.clone();
        }
        let base = &self.supervision_urls[self.supervision_url_index % self.supervision_urls.len()];
        self.supervision_url_index = self.supervision_url_index.wrapping_add(1);
        format!("{}/{}", base.trim_end_matches('/'), self.station.charging_station_id)
    }
}

/// Collapses the 1.6 status this engine actually tracks down to 2.0.1's
/// smaller `ConnectorStatusEnumType` vocabulary for outgoing v2.0.1
/// StatusNotifications.
fn v201_status_str(status: ConnectorStatusV16) -> &'static str {
    use ConnectorStatusV16::*;
    match status {
        Available => "Available",
        Preparing | Charging | SuspendedEVSE | SuspendedEV | Finishing => "Occupied",
        Reserved => "Reserved",
        Unavailable => "Unavailable",
        Faulted => "Faulted",
    }
}

fn convert_registration_status_v16(status: rust_ocpp::v1_6::types::RegistrationStatus) -> RegistrationStatus {
    use rust_ocpp::v1_6::types::RegistrationStatus as Wire;
    match status {
        Wire::Accepted => RegistrationStatus::Accepted,
        Wire::Pending => RegistrationStatus::Pending,
        Wire::Rejected => RegistrationStatus::Rejected,
    }
}

fn parse_stop_reason(reason: &str) -> Option<rust_ocpp::v1_6::types::Reason> {
    use rust_ocpp::v1_6::types::Reason::*;
    match reason {
        "EmergencyStop" => Some(EmergencyStop),
        "EVDisconnected" => Some(EVDisconnected),
        "HardReset" => Some(HardReset),
        "Local" => Some(Local),
        "PowerLoss" => Some(PowerLoss),
        "Reboot" => Some(Reboot),
        "Remote" => Some(Remote),
        "SoftReset" => Some(SoftReset),
        "UnlockCommand" => Some(UnlockCommand),
        "DeAuthorized" => Some(DeAuthorized),
        _ => Some(Other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_fixed_withdraws_one_second() {
        let config = EngineConfig { connection_timeout_s: 30, reconnect_exponential_delay: false, ..Default::default() };
        let station = test_station();
        let engine = StationEngine {
            station,
            config,
            schemas: Arc::new(SchemaRegistry::bundled()),
            supervision_urls: vec![],
            supervision_url_index: 0,
            request_cache: Arc::new(Mutex::new(RequestCache::new())),
            ws_sink: None,
            message_buffer: VecDeque::new(),
        };
        assert_eq!(engine.reconnect_delay(), Duration::from_secs(29));
    }

    #[test]
    fn reconnect_delay_exponential_grows_with_retry_count() {
        let config = EngineConfig { reconnect_exponential_delay: true, ..Default::default() };
        let mut station = test_station();
        station.auto_reconnect_retry_count = 3;
        let engine = StationEngine {
            station,
            config,
            schemas: Arc::new(SchemaRegistry::bundled()),
            supervision_urls: vec![],
            supervision_url_index: 0,
            request_cache: Arc::new(Mutex::new(RequestCache::new())),
            ws_sink: None,
            message_buffer: VecDeque::new(),
        };
        assert_eq!(engine.reconnect_delay(), Duration::from_millis(500 * 8));
    }

    #[test]
    fn should_reconnect_respects_max_retries() {
        let config = EngineConfig { auto_reconnect_max_retries: 2, ..Default::default() };
        let mut station = test_station();
        station.auto_reconnect_retry_count = 2;
        let engine = StationEngine {
            station,
            config,
            schemas: Arc::new(SchemaRegistry::bundled()),
            supervision_urls: vec![],
            supervision_url_index: 0,
            request_cache: Arc::new(Mutex::new(RequestCache::new())),
            ws_sink: None,
            message_buffer: VecDeque::new(),
        };
        assert!(engine.should_reconnect());
        let mut not_ok = engine;
        not_ok.station.auto_reconnect_retry_count = 3;
        assert!(!not_ok.should_reconnect());
    }

    #[test]
    fn next_supervision_url_round_robins_and_appends_station_id() {
        let config = EngineConfig::default();
        let station = test_station();
        let mut engine = StationEngine {
            station,
            config,
            schemas: Arc::new(SchemaRegistry::bundled()),
            supervision_urls: vec!["ws://a".into(), "ws://b".into()],
            supervision_url_index: 0,
            request_cache: Arc::new(Mutex::new(RequestCache::new())),
            ws_sink: None,
            message_buffer: VecDeque::new(),
        };
        assert_eq!(engine.next_supervision_url(), "ws://a/CP-1");
        assert_eq!(engine.next_supervision_url(), "ws://b/CP-1");
        assert_eq!(engine.next_supervision_url(), "ws://a/CP-1");
    }

    fn test_station() -> Station {
        use crate::domain::config_keys::OcppConfigKeys;
        use crate::domain::connector::Connector;
        use crate::domain::evse::ConnectorTopology;
        use crate::domain::station::ElectricalProfile;
        use crate::domain::template::CurrentOutType;
        use std::collections::BTreeMap;

        let mut connectors = BTreeMap::new();
        connectors.insert(1, Connector::new(1));
        Station {
            hash_id: "hash-1".into(),
            charging_station_id: "CP-1".into(),
            index: 0,
            ocpp_version: OcppVersion::V16,
            template_path: "template.json".into(),
            template_hash: "deadbeef".into(),
            charge_point_vendor: "Acme".into(),
            charge_point_model: "X1".into(),
            firmware_version: None,
            electrical: ElectricalProfile {
                maximum_power_w: 22000.0,
                maximum_amperage_a: 32.0,
                voltage_out: 230.0,
                number_of_phases: 3,
                current_out_type: CurrentOutType::Ac,
                power_divider: 1,
                power_shared_by_connectors: false,
            },
            started: false,
            starting: false,
            stopping: false,
            boot_notification_response: None,
            heartbeat_interval_s: 300,
            firmware_status: None,
            config_keys: OcppConfigKeys::new(),
            topology: ConnectorTopology::Flat(connectors),
            auto_reconnect_retry_count: 0,
            ws_connection_restarted: false,
        }
    }
}
