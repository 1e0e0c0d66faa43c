use std::time::Duration;

use rocpp_core::format::message::Invalid;

/// Contract violations by whoever drives the store. These are internal
/// faults: they are logged, never sent to a station.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("request id {0} is already registered")]
    DuplicateRequestId(String),
    #[error("no request registered with id {0}")]
    UnknownRequestId(String),
    #[error("request {0} was already completed")]
    AlreadyCompleted(String),
    #[error("request {request_id} expects a {expected} response, got {got}")]
    PayloadMismatch {
        request_id: String,
        expected: &'static str,
        got: &'static str,
    },
    #[error("request {request_id} was sent to {expected}, reply came from {got}")]
    StationMismatch {
        request_id: String,
        expected: String,
        got: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid frame from {station}: {invalid}")]
    InvalidFrame { station: String, invalid: Invalid },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse engine config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("sweep interval {sweep:?} must be at most a tenth of the minimum call timeout {min:?}")]
    SweepTooCoarse { sweep: Duration, min: Duration },
    #[error("{field} exceeds the longest allowed call timeout {max:?}")]
    TooLong { field: &'static str, max: Duration },
}
