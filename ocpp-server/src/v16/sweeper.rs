use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{
    hooks::{EngineEvent, EventHooks},
    store::PendingRequests,
};

/// Periodically fails requests whose deadline passed and drops resolved
/// requests older than the retention window.
#[derive(Debug)]
pub struct TimeoutSweeper {
    store: Arc<PendingRequests>,
    hooks: EventHooks,
    interval: Duration,
    retention: Duration,
}

impl TimeoutSweeper {
    pub fn new(
        store: Arc<PendingRequests>,
        hooks: EventHooks,
        interval: Duration,
        retention: Duration,
    ) -> Self {
        Self {
            store,
            hooks,
            interval,
            retention,
        }
    }

    /// One pass at `now`. Returns the number of requests timed out.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let expired = self.store.take_expired(now);
        for entry in &expired {
            log::debug!(
                "request {} to {} timed out, deadline: {}",
                entry.request_id(),
                entry.charging_station_id(),
                entry.timeout()
            );
            if let Some(event) = EngineEvent::resolved(entry) {
                self.hooks.emit(&event);
            }
        }

        let cutoff = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention));
        if let Some(cutoff) = cutoff {
            let evicted = self.store.evict_resolved(cutoff);
            if evicted > 0 {
                log::trace!("evicted {} resolved requests", evicted);
            }
        }
        expired.len()
    }

    pub async fn run(self, stop_token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::debug!("timeout sweeper started, interval: {:?}", self.interval);
        loop {
            tokio::select! {
                biased;
                _ = stop_token.cancelled() => {
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep(Utc::now());
                }
            }
        }
        log::debug!("timeout sweeper stopped");
    }

    pub fn spawn(self, stop_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(stop_token))
    }
}
