use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::request::{CallFailure, Outcome, PendingRequest};

#[derive(Debug, Clone)]
pub enum EngineEvent {
    NewConnection {
        timestamp: DateTime<Utc>,
        channel: String,
        connection: String,
        event_tracking_id: Uuid,
        cancellation: CancellationToken,
    },
    TextRequestSent {
        timestamp: DateTime<Utc>,
        connection: String,
        request_id: String,
        frame: String,
    },
    TextResponseReceived {
        timestamp: DateTime<Utc>,
        connection: String,
        request_id: String,
        request: String,
        response: Value,
        runtime: chrono::Duration,
    },
    TextErrorReceived {
        timestamp: DateTime<Utc>,
        connection: String,
        request_id: String,
        request: String,
        error: CallFailure,
    },
    BinaryRequestSent {
        timestamp: DateTime<Utc>,
        connection: String,
        request_id: String,
        frame: Vec<u8>,
    },
    BinaryResponseReceived {
        timestamp: DateTime<Utc>,
        connection: String,
        request_id: String,
        request: Vec<u8>,
        response: Vec<u8>,
        runtime: chrono::Duration,
    },
    BinaryErrorReceived {
        timestamp: DateTime<Utc>,
        connection: String,
        request_id: String,
        request: Vec<u8>,
        error: CallFailure,
    },
}

impl EngineEvent {
    pub fn request_sent(entry: &PendingRequest) -> Self {
        match entry {
            PendingRequest::Text(s) => EngineEvent::TextRequestSent {
                timestamp: s.timestamp(),
                connection: s.charging_station_id().to_string(),
                request_id: s.request_id().to_string(),
                frame: s.request().clone(),
            },
            PendingRequest::Binary(s) => EngineEvent::BinaryRequestSent {
                timestamp: s.timestamp(),
                connection: s.charging_station_id().to_string(),
                request_id: s.request_id().to_string(),
                frame: s.request().clone(),
            },
        }
    }

    /// Event for a request that left `Pending`; `None` while it is still
    /// waiting.
    pub fn resolved(entry: &PendingRequest) -> Option<Self> {
        let event = match entry {
            PendingRequest::Text(s) => match s.outcome()? {
                Outcome::Completed {
                    response_timestamp,
                    response,
                } => EngineEvent::TextResponseReceived {
                    timestamp: *response_timestamp,
                    connection: s.charging_station_id().to_string(),
                    request_id: s.request_id().to_string(),
                    request: s.request().clone(),
                    response: response.clone(),
                    runtime: *response_timestamp - s.timestamp(),
                },
                Outcome::Failed {
                    response_timestamp,
                    error,
                } => EngineEvent::TextErrorReceived {
                    timestamp: *response_timestamp,
                    connection: s.charging_station_id().to_string(),
                    request_id: s.request_id().to_string(),
                    request: s.request().clone(),
                    error: error.clone(),
                },
            },
            PendingRequest::Binary(s) => match s.outcome()? {
                Outcome::Completed {
                    response_timestamp,
                    response,
                } => EngineEvent::BinaryResponseReceived {
                    timestamp: *response_timestamp,
                    connection: s.charging_station_id().to_string(),
                    request_id: s.request_id().to_string(),
                    request: s.request().clone(),
                    response: response.clone(),
                    runtime: *response_timestamp - s.timestamp(),
                },
                Outcome::Failed {
                    response_timestamp,
                    error,
                } => EngineEvent::BinaryErrorReceived {
                    timestamp: *response_timestamp,
                    connection: s.charging_station_id().to_string(),
                    request_id: s.request_id().to_string(),
                    request: s.request().clone(),
                    error: error.clone(),
                },
            },
        };
        Some(event)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            EngineEvent::NewConnection { timestamp, .. }
            | EngineEvent::TextRequestSent { timestamp, .. }
            | EngineEvent::TextResponseReceived { timestamp, .. }
            | EngineEvent::TextErrorReceived { timestamp, .. }
            | EngineEvent::BinaryRequestSent { timestamp, .. }
            | EngineEvent::BinaryResponseReceived { timestamp, .. }
            | EngineEvent::BinaryErrorReceived { timestamp, .. } => *timestamp,
        }
    }

    pub fn connection(&self) -> &str {
        match self {
            EngineEvent::NewConnection { connection, .. }
            | EngineEvent::TextRequestSent { connection, .. }
            | EngineEvent::TextResponseReceived { connection, .. }
            | EngineEvent::TextErrorReceived { connection, .. }
            | EngineEvent::BinaryRequestSent { connection, .. }
            | EngineEvent::BinaryResponseReceived { connection, .. }
            | EngineEvent::BinaryErrorReceived { connection, .. } => connection,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            EngineEvent::NewConnection { .. } => None,
            EngineEvent::TextRequestSent { request_id, .. }
            | EngineEvent::TextResponseReceived { request_id, .. }
            | EngineEvent::TextErrorReceived { request_id, .. }
            | EngineEvent::BinaryRequestSent { request_id, .. }
            | EngineEvent::BinaryResponseReceived { request_id, .. }
            | EngineEvent::BinaryErrorReceived { request_id, .. } => Some(request_id),
        }
    }
}

pub trait EventHook: Send + Sync + 'static {
    fn notify(&self, event: &EngineEvent) -> anyhow::Result<()>;
}

impl<F> EventHook for F
where
    F: Fn(&EngineEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn notify(&self, event: &EngineEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Subscriber list shared by the engine and the sweeper.
#[derive(Clone, Default)]
pub struct EventHooks {
    subscribers: Arc<RwLock<Vec<Arc<dyn EventHook>>>>,
}

impl std::fmt::Debug for EventHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHooks")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl EventHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, hook: impl EventHook) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hands the event to every subscriber. A subscriber that errors or
    /// panics is logged and skipped; the rest still get the event.
    pub fn emit(&self, event: &EngineEvent) {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in subscribers {
            match catch_unwind(AssertUnwindSafe(|| hook.notify(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("event hook failed: {:#}", e),
                Err(_) => log::warn!("event hook panicked on {}", event.connection()),
            }
        }
    }
}

/// Request and response log written through the `log` facade.
#[derive(Debug, Clone)]
pub struct LogHook {
    server: String,
}

impl LogHook {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
        }
    }
}

impl EventHook for LogHook {
    fn notify(&self, event: &EngineEvent) -> anyhow::Result<()> {
        let server = &self.server;
        match event {
            EngineEvent::NewConnection {
                channel,
                connection,
                event_tracking_id,
                ..
            } => {
                log::info!("[{server}] new connection {connection} on {channel} ({event_tracking_id})");
            }
            EngineEvent::TextRequestSent { connection, frame, .. } => {
                log::info!("[{server}] [MSG_OUT] {connection} {frame}");
            }
            EngineEvent::TextResponseReceived {
                connection,
                request,
                response,
                runtime,
                ..
            } => {
                log::info!(
                    "[{server}] [MSG_IN] {connection} {response} for {request} after {}ms",
                    runtime.num_milliseconds()
                );
            }
            EngineEvent::TextErrorReceived {
                connection,
                request,
                error,
                ..
            } => {
                log::warn!("[{server}] [MSG_ERR] {connection} {error} for {request}");
            }
            EngineEvent::BinaryRequestSent {
                connection,
                request_id,
                frame,
                ..
            } => {
                log::info!("[{server}] [MSG_OUT] {connection} {request_id} ({} bytes)", frame.len());
            }
            EngineEvent::BinaryResponseReceived {
                connection,
                request_id,
                response,
                runtime,
                ..
            } => {
                log::info!(
                    "[{server}] [MSG_IN] {connection} {request_id} ({} bytes) after {}ms",
                    response.len(),
                    runtime.num_milliseconds()
                );
            }
            EngineEvent::BinaryErrorReceived {
                connection,
                request_id,
                error,
                ..
            } => {
                log::warn!("[{server}] [MSG_ERR] {connection} {request_id} {error}");
            }
        }
        Ok(())
    }
}

/// Forwards every event into a channel.
#[derive(Debug, Clone)]
pub struct ChannelHook {
    tx: flume::Sender<EngineEvent>,
}

impl ChannelHook {
    pub fn new() -> (Self, flume::Receiver<EngineEvent>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }
}

impl EventHook for ChannelHook {
    fn notify(&self, event: &EngineEvent) -> anyhow::Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| anyhow::anyhow!("event receiver dropped"))
    }
}
