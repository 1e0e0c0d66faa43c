mod config;
mod engine;
mod error;
mod hooks;
mod request;
mod store;
mod sweeper;
mod transport;

pub use {
    config::{EngineConfig, MAX_CALL_TIMEOUT_SECS},
    engine::{ConnectionContext, Engine},
    error::{ConfigError, EngineError, StoreError},
    hooks::{ChannelHook, EngineEvent, EventHook, EventHooks, LogHook},
    request::{
        Binary, BinaryRequestState, CallFailure, ErrorCode, FrameKind, Outcome, PendingRequest,
        RequestState, RequestStatus, Response, ResponseHandle, Text, TextRequestState,
    },
    store::PendingRequests,
    sweeper::TimeoutSweeper,
    transport::{StationTransport, TransportError},
};
