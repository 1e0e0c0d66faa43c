use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, OnceLock, PoisonError},
    task::{Context, Poll},
};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use rocpp_core::{
    format::error::{GenericError, OcppError},
    v16::protocol_error::ProtocolError,
};
use serde_json::Value;
use tokio::sync::oneshot;

pub type ErrorCode = OcppError<ProtocolError>;

/// The `(ErrorCode, ErrorDescription, ErrorDetails)` triple every failed
/// request resolves to, whether the station sent a `CallError` or the
/// engine gave up on it.
#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct CallFailure {
    pub code: ErrorCode,
    pub description: String,
    pub details: Value,
}

impl CallFailure {
    pub fn new(code: impl Into<ErrorCode>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            details: serde_json::json!({}),
        }
    }

    pub fn protocol(code: ProtocolError, description: impl Into<String>, details: Value) -> Self {
        Self {
            code: OcppError::Protocol(code),
            description: description.into(),
            details,
        }
    }

    pub fn timeout(deadline: DateTime<Utc>) -> Self {
        Self::new(GenericError::Timeout, "no response before deadline")
            .with_details(serde_json::json!({ "deadline": deadline.to_rfc3339() }))
    }

    pub fn connection_lost(description: impl Into<String>) -> Self {
        Self::new(GenericError::ConnectionLost, description)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

impl std::fmt::Display for CallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.description.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.description)
        }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Text {}
    impl Sealed for super::Binary {}
}

/// Payload shape of a request. Implemented by [`Text`] and [`Binary`] only.
pub trait FrameKind: sealed::Sealed + std::fmt::Debug + Send + Sync + Sized + 'static {
    type Request: Clone + std::fmt::Debug + Send + Sync + 'static;
    type Response: Clone + std::fmt::Debug + PartialEq + Send + Sync + 'static;

    const NAME: &'static str;

    #[doc(hidden)]
    fn wrap(state: Arc<RequestState<Self>>) -> PendingRequest;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Text;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binary;

impl FrameKind for Text {
    type Request = String;
    type Response = Value;

    const NAME: &'static str = "text";

    fn wrap(state: Arc<RequestState<Self>>) -> PendingRequest {
        PendingRequest::Text(state)
    }
}

impl FrameKind for Binary {
    type Request = Vec<u8>;
    type Response = Vec<u8>;

    const NAME: &'static str = "binary";

    fn wrap(state: Arc<RequestState<Self>>) -> PendingRequest {
        PendingRequest::Binary(state)
    }
}

pub type TextRequestState = RequestState<Text>;
pub type BinaryRequestState = RequestState<Binary>;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<R> {
    Completed {
        response_timestamp: DateTime<Utc>,
        response: R,
    },
    Failed {
        response_timestamp: DateTime<Utc>,
        error: CallFailure,
    },
}

impl<R> Outcome<R> {
    pub fn response_timestamp(&self) -> DateTime<Utc> {
        match self {
            Outcome::Completed { response_timestamp, .. } => *response_timestamp,
            Outcome::Failed { response_timestamp, .. } => *response_timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Completed,
    Failed,
}

type Reply<K> = Result<<K as FrameKind>::Response, CallFailure>;

/// One outstanding request. Everything but the outcome is fixed at
/// construction; the outcome is written once by [`RequestState::resolve`].
#[derive(Debug)]
pub struct RequestState<K: FrameKind> {
    request_id: String,
    charging_station_id: String,
    timestamp: DateTime<Utc>,
    timeout: DateTime<Utc>,
    request: K::Request,
    outcome: OnceLock<Outcome<K::Response>>,
    waiter: Mutex<Option<oneshot::Sender<Reply<K>>>>,
}

impl<K: FrameKind> RequestState<K> {
    pub fn new(
        request_id: impl Into<String>,
        charging_station_id: impl Into<String>,
        request: K::Request,
        timestamp: DateTime<Utc>,
        timeout: DateTime<Utc>,
    ) -> (Self, ResponseHandle<K>) {
        let request_id = request_id.into();
        let (tx, rx) = oneshot::channel();
        let state = Self {
            request_id: request_id.clone(),
            charging_station_id: charging_station_id.into(),
            timestamp,
            timeout,
            request,
            outcome: OnceLock::new(),
            waiter: Mutex::new(Some(tx)),
        };
        (state, ResponseHandle { request_id, rx })
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn charging_station_id(&self) -> &str {
        &self.charging_station_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn timeout(&self) -> DateTime<Utc> {
        self.timeout
    }

    pub fn request(&self) -> &K::Request {
        &self.request
    }

    pub fn outcome(&self) -> Option<&Outcome<K::Response>> {
        self.outcome.get()
    }

    pub fn status(&self) -> RequestStatus {
        match self.outcome.get() {
            None => RequestStatus::Pending,
            Some(Outcome::Completed { .. }) => RequestStatus::Completed,
            Some(Outcome::Failed { .. }) => RequestStatus::Failed,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.outcome.get().is_none()
    }

    pub fn has_errors(&self) -> bool {
        matches!(self.outcome.get(), Some(Outcome::Failed { .. }))
    }

    pub fn response(&self) -> Option<&K::Response> {
        match self.outcome.get() {
            Some(Outcome::Completed { response, .. }) => Some(response),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&CallFailure> {
        match self.outcome.get() {
            Some(Outcome::Failed { error, .. }) => Some(error),
            _ => None,
        }
    }

    pub fn response_timestamp(&self) -> Option<DateTime<Utc>> {
        self.outcome.get().map(Outcome::response_timestamp)
    }

    /// Time between sending the request and its resolution.
    pub fn runtime(&self) -> Option<chrono::Duration> {
        self.response_timestamp().map(|at| at - self.timestamp)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.timeout <= now
    }

    /// Moves the request out of `Pending`. Returns false when another
    /// completion got there first, in which case nothing changes.
    pub(crate) fn resolve(&self, outcome: Outcome<K::Response>) -> bool {
        if self.outcome.set(outcome).is_err() {
            return false;
        }
        let reply = match self.outcome.get() {
            Some(Outcome::Completed { response, .. }) => Ok(response.clone()),
            Some(Outcome::Failed { error, .. }) => Err(error.clone()),
            None => return true,
        };
        let waiter = self
            .waiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = waiter {
            // the caller may have stopped waiting
            let _ = tx.send(reply);
        }
        true
    }
}

/// A registered request of either payload shape.
#[derive(Debug, Clone)]
pub enum PendingRequest {
    Text(Arc<TextRequestState>),
    Binary(Arc<BinaryRequestState>),
}

macro_rules! each_kind {
    ($self:ident, $state:ident => $body:expr) => {
        match $self {
            PendingRequest::Text($state) => $body,
            PendingRequest::Binary($state) => $body,
        }
    };
}

impl PendingRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            PendingRequest::Text(_) => Text::NAME,
            PendingRequest::Binary(_) => Binary::NAME,
        }
    }

    pub fn request_id(&self) -> &str {
        each_kind!(self, s => s.request_id())
    }

    pub fn charging_station_id(&self) -> &str {
        each_kind!(self, s => s.charging_station_id())
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        each_kind!(self, s => s.timestamp())
    }

    pub fn timeout(&self) -> DateTime<Utc> {
        each_kind!(self, s => s.timeout())
    }

    pub fn status(&self) -> RequestStatus {
        each_kind!(self, s => s.status())
    }

    pub fn is_pending(&self) -> bool {
        each_kind!(self, s => s.is_pending())
    }

    pub fn has_errors(&self) -> bool {
        each_kind!(self, s => s.has_errors())
    }

    pub fn error(&self) -> Option<&CallFailure> {
        each_kind!(self, s => s.error())
    }

    pub fn response_timestamp(&self) -> Option<DateTime<Utc>> {
        each_kind!(self, s => s.response_timestamp())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        each_kind!(self, s => s.is_expired(now))
    }

    pub(crate) fn fail(&self, error: CallFailure, at: DateTime<Utc>) -> bool {
        each_kind!(self, s => s.resolve(Outcome::Failed { response_timestamp: at, error }))
    }
}

/// Response payload handed to the store by the inbound side.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Text(Value),
    Binary(Vec<u8>),
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Text(_) => Text::NAME,
            Response::Binary(_) => Binary::NAME,
        }
    }
}

/// Resolves once the request it was created with leaves `Pending`.
#[derive(Debug)]
pub struct ResponseHandle<K: FrameKind> {
    request_id: String,
    rx: oneshot::Receiver<Reply<K>>,
}

impl<K: FrameKind> ResponseHandle<K> {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl<K: FrameKind> Future for ResponseHandle<K> {
    type Output = Reply<K>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.rx.poll_unpin(cx) {
            Poll::Ready(Ok(reply)) => Poll::Ready(reply),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CallFailure::new(
                GenericError::General,
                "request was dropped before completion",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}
