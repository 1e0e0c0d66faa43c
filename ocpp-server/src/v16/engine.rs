use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rocpp_core::{
    format::{
        error::GenericError,
        frame::Call,
        message::{CallResponse, EncodeDecode, OcppMessage},
    },
    v16::protocol_error::ProtocolError,
};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    config::EngineConfig,
    error::{ConfigError, EngineError, StoreError},
    hooks::{EngineEvent, EventHook, EventHooks},
    request::{
        Binary, CallFailure, FrameKind, PendingRequest, RequestState, Response, ResponseHandle,
        Text,
    },
    store::PendingRequests,
    sweeper::TimeoutSweeper,
    transport::{StationTransport, TransportError},
};

#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub station_id: String,
    pub channel: String,
    pub event_tracking_id: Uuid,
    pub connected_at: DateTime<Utc>,
    pub cancellation: CancellationToken,
}

/// Sends requests to stations and matches what comes back to the caller
/// that is waiting for it.
pub struct Engine<T: StationTransport> {
    config: EngineConfig,
    store: Arc<PendingRequests>,
    hooks: EventHooks,
    transport: T,
    connections: DashMap<String, ConnectionContext>,
    stop_token: CancellationToken,
}

impl<T: StationTransport> Engine<T> {
    pub fn new(config: EngineConfig, transport: T) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            store: Arc::new(PendingRequests::new()),
            hooks: EventHooks::new(),
            transport,
            connections: DashMap::new(),
            stop_token: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<PendingRequests> {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn subscribe(&self, hook: impl EventHook) {
        self.hooks.subscribe(hook);
    }

    /// Starts the timeout sweeper. It runs until [`Engine::shutdown`] or
    /// until the engine is dropped.
    pub fn start(&self) -> JoinHandle<()> {
        TimeoutSweeper::new(
            self.store.clone(),
            self.hooks.clone(),
            self.config.sweep_interval(),
            self.config.retention(),
        )
        .spawn(self.stop_token.child_token())
    }

    pub fn shutdown(&self) {
        log::debug!("engine shutdown");
        self.stop_token.cancel();
    }

    pub async fn send_text(
        &self,
        station_id: &str,
        call: Call,
        timeout: Option<Duration>,
    ) -> Result<ResponseHandle<Text>, EngineError> {
        let frame = call.encode();
        self.send::<Text>(station_id, call.unique_id, frame, timeout)
            .await
    }

    pub async fn send_binary(
        &self,
        station_id: &str,
        request_id: &str,
        frame: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<ResponseHandle<Binary>, EngineError> {
        self.send::<Binary>(station_id, request_id.to_string(), frame, timeout)
            .await
    }

    async fn send<K: FrameKind>(
        &self,
        station_id: &str,
        request_id: String,
        frame: K::Request,
        timeout: Option<Duration>,
    ) -> Result<ResponseHandle<K>, EngineError> {
        let now = Utc::now();
        let deadline = deadline_after(now, self.config.effective_timeout(timeout));
        let (state, handle) = RequestState::<K>::new(request_id, station_id, frame, now, deadline);
        let entry = K::wrap(self.store.register(state)?);

        match transmit(&self.transport, &entry).await {
            Ok(()) => self.hooks.emit(&EngineEvent::request_sent(&entry)),
            Err(e) => self.fail_unsent(&entry, e),
        }
        Ok(handle)
    }

    fn fail_unsent(&self, entry: &PendingRequest, e: TransportError) {
        log::warn!(
            "sending {} to {} failed: {}",
            entry.request_id(),
            entry.charging_station_id(),
            e
        );
        let code = match e {
            TransportError::NotConnected(_) => GenericError::ConnectionLost,
            TransportError::Send(_) => GenericError::General,
        };
        if entry.fail(CallFailure::new(code, e.to_string()), Utc::now()) {
            self.emit_resolved(entry);
        }
    }

    /// Routes one inbound OCPP-J text frame. Replies are matched to their
    /// request; calls initiated by the station are handed back for dispatch.
    pub fn on_text_frame_received(
        &self,
        station_id: &str,
        raw: &str,
    ) -> Result<Option<Call>, EngineError> {
        match OcppMessage::<ProtocolError>::decode(raw) {
            OcppMessage::Call(call) => Ok(Some(call)),
            OcppMessage::CallResponse(CallResponse::CallResult(result)) => {
                self.on_text_response(station_id, &result.unique_id, Ok(result.payload))?;
                Ok(None)
            }
            OcppMessage::CallResponse(CallResponse::CallError(error)) => {
                let failure = CallFailure::protocol(
                    error.error_code,
                    error.error_description,
                    error.error_details,
                );
                self.on_text_response(station_id, &error.unique_id, Err(failure))?;
                Ok(None)
            }
            OcppMessage::Invalid(invalid) => {
                log::warn!("invalid frame from {}: {}", station_id, invalid);
                // ids of calls made by the station never name one of our requests
                let request_id = invalid.unique_id.as_deref().filter(|_| invalid.is_response());
                if let Some(unique_id) = request_id {
                    self.fail_unparsable(station_id, unique_id, &invalid.err_msg);
                }
                Err(EngineError::InvalidFrame {
                    station: station_id.to_string(),
                    invalid,
                })
            }
        }
    }

    pub fn on_text_response(
        &self,
        station_id: &str,
        request_id: &str,
        reply: Result<Value, CallFailure>,
    ) -> Result<(), EngineError> {
        self.complete(station_id, request_id, reply.map(Response::Text))
    }

    pub fn on_binary_frame_received(
        &self,
        station_id: &str,
        request_id: &str,
        reply: Result<Vec<u8>, CallFailure>,
    ) -> Result<(), EngineError> {
        self.complete(station_id, request_id, reply.map(Response::Binary))
    }

    pub fn on_new_connection(&self, station_id: &str, channel: &str) -> ConnectionContext {
        let context = ConnectionContext {
            station_id: station_id.to_string(),
            channel: channel.to_string(),
            event_tracking_id: Uuid::new_v4(),
            connected_at: Utc::now(),
            cancellation: self.stop_token.child_token(),
        };
        if let Some(previous) = self.connections.insert(station_id.to_string(), context.clone()) {
            log::warn!(
                "{} reconnected on {} while {} was still open",
                station_id,
                channel,
                previous.channel
            );
            previous.cancellation.cancel();
            self.fail_station(station_id, "connection replaced by a new one");
        }
        self.hooks.emit(&EngineEvent::NewConnection {
            timestamp: context.connected_at,
            channel: context.channel.clone(),
            connection: context.station_id.clone(),
            event_tracking_id: context.event_tracking_id,
            cancellation: context.cancellation.clone(),
        });
        context
    }

    /// Fails everything still waiting on `station_id` right away instead of
    /// letting each request run into its timeout. Returns how many failed.
    ///
    /// `event_tracking_id` names the connection that closed. A close for a
    /// connection that was already replaced by a newer one is ignored.
    pub fn on_connection_closed(&self, station_id: &str, event_tracking_id: Uuid) -> usize {
        let Some((_, context)) = self
            .connections
            .remove_if(station_id, |_, current| current.event_tracking_id == event_tracking_id)
        else {
            log::debug!(
                "ignoring close of {} connection {}, not the current one",
                station_id,
                event_tracking_id
            );
            return 0;
        };
        context.cancellation.cancel();
        let failed = self.fail_station(station_id, "connection closed");
        log::info!("{} disconnected, {} pending requests failed", station_id, failed);
        failed
    }

    pub fn connection(&self, station_id: &str) -> Option<ConnectionContext> {
        self.connections.get(station_id).map(|c| c.value().clone())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn complete(
        &self,
        station_id: &str,
        request_id: &str,
        reply: Result<Response, CallFailure>,
    ) -> Result<(), EngineError> {
        if let Some(entry) = self.store.get(request_id) {
            if entry.charging_station_id() != station_id {
                log::error!(
                    "reply for {} from {}, request was sent to {}",
                    request_id,
                    station_id,
                    entry.charging_station_id()
                );
                return Err(StoreError::StationMismatch {
                    request_id: request_id.to_string(),
                    expected: entry.charging_station_id().to_string(),
                    got: station_id.to_string(),
                }
                .into());
            }
        }

        let at = Utc::now();
        let entry = match reply {
            Ok(response) => self.store.complete_with_response(request_id, response, at)?,
            Err(failure) => self.store.complete_with_error(
                request_id,
                failure.code,
                failure.description,
                failure.details,
                at,
            )?,
        };
        self.emit_resolved(&entry);
        Ok(())
    }

    fn fail_unparsable(&self, station_id: &str, request_id: &str, reason: &str) {
        let Some(entry) = self.store.get(request_id) else {
            return;
        };
        if entry.charging_station_id() != station_id {
            return;
        }
        let failure = CallFailure::new(GenericError::ParsingError, reason.to_string());
        if entry.fail(failure, Utc::now()) {
            self.emit_resolved(&entry);
        }
    }

    fn fail_station(&self, station_id: &str, reason: &str) -> usize {
        let failed = self.store.fail_station(
            station_id,
            CallFailure::connection_lost(reason),
            Utc::now(),
        );
        for entry in &failed {
            self.emit_resolved(entry);
        }
        failed.len()
    }

    fn emit_resolved(&self, entry: &PendingRequest) {
        if let Some(event) = EngineEvent::resolved(entry) {
            self.hooks.emit(&event);
        }
    }
}

impl<T: StationTransport> Drop for Engine<T> {
    fn drop(&mut self) {
        self.stop_token.cancel();
    }
}

impl<T: StationTransport> std::fmt::Debug for Engine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("requests", &self.store.len())
            .field("connections", &self.connections.len())
            .field("hooks", &self.hooks)
            .finish()
    }
}

async fn transmit<T: StationTransport>(
    transport: &T,
    entry: &PendingRequest,
) -> Result<(), TransportError> {
    match entry {
        PendingRequest::Text(s) => {
            transport
                .send_text(s.charging_station_id(), s.request().clone())
                .await
        }
        PendingRequest::Binary(s) => {
            transport
                .send_binary(s.charging_station_id(), s.request().clone())
                .await
        }
    }
}

fn deadline_after(now: DateTime<Utc>, timeout: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|timeout| now.checked_add_signed(timeout))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
