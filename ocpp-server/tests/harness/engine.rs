use std::{sync::{Arc, Once}, time::Duration};

use log::LevelFilter;
use rocpp_server::v16::{ChannelHook, ConnectionContext, Engine, EngineConfig, EngineEvent, LogHook};
use tokio::task::JoinHandle;

use super::transport::{MockTransport, MockTransportHandle};

static INIT: Once = Once::new();

fn init_logger() {
    INIT.call_once(|| {
        env_logger::builder()
            .is_test(true)
            .filter_level(LevelFilter::Trace)
            .try_init()
            .ok();
    });
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        server_name: String::from("test-csms"),
        call_timeout: 5,
        min_call_timeout_ms: 200,
        sweep_interval_ms: 20,
        retention: 60,
    }
}

pub struct EngineHarness {
    pub engine: Arc<Engine<MockTransport>>,
    pub transport: MockTransportHandle,
    pub events: flume::Receiver<EngineEvent>,
    sweeper: JoinHandle<()>,
}

impl EngineHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_logger();
        let (transport, handle) = MockTransport::new();
        let engine = Engine::new(config, transport).expect("valid config");
        let (hook, events) = ChannelHook::new();
        engine.subscribe(LogHook::new(engine.config().server_name.clone()));
        engine.subscribe(hook);
        let sweeper = engine.start();
        Self {
            engine: Arc::new(engine),
            transport: handle,
            events,
            sweeper,
        }
    }

    /// Opens a connection for `station_id` and drains the connection event.
    pub async fn connect(&self, station_id: &str) -> ConnectionContext {
        self.transport.connect(station_id);
        let context = self.engine.on_new_connection(station_id, "ws-test");
        match self.next_event().await {
            EngineEvent::NewConnection { connection, .. } => assert_eq!(connection, station_id),
            other => panic!("expected new connection, got {:?}", other),
        }
        context
    }

    pub async fn next_event(&self) -> EngineEvent {
        tokio::time::timeout(Duration::from_secs(2), self.events.recv_async())
            .await
            .expect("no event emitted")
            .expect("event channel closed")
    }

    pub fn no_more_events(&self) -> bool {
        self.events.is_empty()
    }

    pub async fn stop(self) {
        self.engine.shutdown();
        tokio::time::timeout(Duration::from_secs(2), self.sweeper)
            .await
            .expect("sweeper did not stop")
            .expect("sweeper panicked");
    }
}
