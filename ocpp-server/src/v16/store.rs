use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde_json::Value;

use super::{
    error::StoreError,
    request::{CallFailure, ErrorCode, FrameKind, Outcome, PendingRequest, RequestState, Response},
};

/// Requests that were sent and are waiting for (or recently got) an answer,
/// keyed by OCPP unique id.
///
/// The map is sharded, so registering and looking up requests of different
/// stations rarely contend. Completion never takes a map-wide lock: each
/// request's outcome is a write-once cell and the first writer wins.
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: DashMap<String, PendingRequest>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<K: FrameKind>(
        &self,
        state: RequestState<K>,
    ) -> Result<Arc<RequestState<K>>, StoreError> {
        match self.entries.entry(state.request_id().to_string()) {
            Entry::Occupied(entry) => {
                log::error!(
                    "duplicate request id {} for station {}",
                    entry.key(),
                    state.charging_station_id()
                );
                Err(StoreError::DuplicateRequestId(entry.key().clone()))
            }
            Entry::Vacant(entry) => {
                let state = Arc::new(state);
                log::trace!(
                    "registered {} request {} for {}, deadline: {}",
                    K::NAME,
                    state.request_id(),
                    state.charging_station_id(),
                    state.timeout()
                );
                entry.insert(K::wrap(state.clone()));
                Ok(state)
            }
        }
    }

    pub fn complete_with_response(
        &self,
        request_id: &str,
        response: Response,
        at: DateTime<Utc>,
    ) -> Result<PendingRequest, StoreError> {
        let entry = self.lookup(request_id)?;
        let resolved = match (&entry, response) {
            (PendingRequest::Text(state), Response::Text(response)) => {
                state.resolve(Outcome::Completed {
                    response_timestamp: at,
                    response,
                })
            }
            (PendingRequest::Binary(state), Response::Binary(response)) => {
                state.resolve(Outcome::Completed {
                    response_timestamp: at,
                    response,
                })
            }
            (entry, response) => {
                log::error!(
                    "{} response for {} request {}",
                    response.kind(),
                    entry.kind(),
                    request_id
                );
                return Err(StoreError::PayloadMismatch {
                    request_id: request_id.to_string(),
                    expected: entry.kind(),
                    got: response.kind(),
                });
            }
        };
        Self::finish(entry, resolved)
    }

    pub fn complete_with_error(
        &self,
        request_id: &str,
        code: ErrorCode,
        description: String,
        details: Value,
        at: DateTime<Utc>,
    ) -> Result<PendingRequest, StoreError> {
        let entry = self.lookup(request_id)?;
        let resolved = entry.fail(
            CallFailure {
                code,
                description,
                details,
            },
            at,
        );
        Self::finish(entry, resolved)
    }

    /// Fails every pending request whose deadline is at or before `now` with
    /// a timeout. Only requests this call moved out of `Pending` are
    /// returned, so a request is never handed out twice.
    pub fn take_expired(&self, now: DateTime<Utc>) -> Vec<PendingRequest> {
        self.claim(
            |entry| entry.is_expired(now),
            |entry| CallFailure::timeout(entry.timeout()),
            now,
        )
    }

    /// Fails every pending request sent to `station_id`.
    pub fn fail_station(
        &self,
        station_id: &str,
        error: CallFailure,
        at: DateTime<Utc>,
    ) -> Vec<PendingRequest> {
        self.claim(
            |entry| entry.is_pending() && entry.charging_station_id() == station_id,
            |_| error.clone(),
            at,
        )
    }

    /// Drops resolved requests that were resolved at or before `older_than`.
    pub fn evict_resolved(&self, older_than: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        self.entries.retain(|_, entry| match entry.response_timestamp() {
            Some(at) if at <= older_than => {
                evicted += 1;
                false
            }
            _ => true,
        });
        evicted
    }

    pub fn get(&self, request_id: &str) -> Option<PendingRequest> {
        self.entries.get(request_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, request_id: &str) -> Option<PendingRequest> {
        self.entries.remove(request_id).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_pending()).count()
    }

    fn lookup(&self, request_id: &str) -> Result<PendingRequest, StoreError> {
        self.get(request_id).ok_or_else(|| {
            log::error!("no request registered with id {}", request_id);
            StoreError::UnknownRequestId(request_id.to_string())
        })
    }

    fn finish(entry: PendingRequest, resolved: bool) -> Result<PendingRequest, StoreError> {
        if resolved {
            Ok(entry)
        } else {
            log::warn!(
                "late reply for request {}, already {:?}",
                entry.request_id(),
                entry.status()
            );
            Err(StoreError::AlreadyCompleted(entry.request_id().to_string()))
        }
    }

    // Candidates are collected first so no shard lock is held while the
    // waiters are signalled.
    fn claim(
        &self,
        select: impl Fn(&PendingRequest) -> bool,
        error: impl Fn(&PendingRequest) -> CallFailure,
        at: DateTime<Utc>,
    ) -> Vec<PendingRequest> {
        let candidates: Vec<PendingRequest> = self
            .entries
            .iter()
            .filter(|entry| select(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        candidates
            .into_iter()
            .filter(|entry| entry.fail(error(entry), at))
            .collect()
    }
}
