//! Client sessions and their liveness.
//!
//! Every HTTP client leases under a session: a [`LesseeId`] that stays alive
//! as long as the client sends keepalives within the configured TTL. Expired
//! and closed sessions are published on the disconnect channel, which
//! releases all their leases.

use core::time::Duration;
use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use snowcast::{DisconnectNotifier, LesseeId};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub struct SessionRegistry {
    sessions: Mutex<HashMap<LesseeId, Instant>>,
    ttl: Duration,
    notifier: DisconnectNotifier,
}

impl SessionRegistry {
    pub fn new(ttl: Duration, notifier: DisconnectNotifier) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
            notifier,
        }
    }

    /// Opens a session with a fresh random identity.
    pub fn open(&self) -> LesseeId {
        let mut sessions = self.sessions.lock();
        let lessee = loop {
            let candidate = LesseeId::random();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        sessions.insert(lessee, Instant::now());
        tracing::info!(%lessee, "session opened");
        lessee
    }

    /// Extends the session's deadline. Returns `false` for unknown or expired
    /// sessions.
    pub fn keepalive(&self, lessee: LesseeId) -> bool {
        match self.sessions.lock().get_mut(&lessee) {
            Some(last_seen) => {
                *last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// True if the session exists and has not been reaped.
    pub fn is_alive(&self, lessee: LesseeId) -> bool {
        self.sessions.lock().contains_key(&lessee)
    }

    /// Ends the session and releases its leases. Returns `false` if it did
    /// not exist.
    pub fn close(&self, lessee: LesseeId) -> bool {
        let existed = self.sessions.lock().remove(&lessee).is_some();
        if existed {
            tracing::info!(%lessee, "session closed");
            self.publish(lessee);
        }
        existed
    }

    /// Expires every session not seen within the TTL as of `now`.
    pub fn reap(&self, now: Instant) -> Vec<LesseeId> {
        let expired: Vec<LesseeId> = {
            let mut sessions = self.sessions.lock();
            let expired = sessions
                .iter()
                .filter(|(_, last_seen)| now.saturating_duration_since(**last_seen) > self.ttl)
                .map(|(lessee, _)| *lessee)
                .collect::<Vec<_>>();
            for lessee in &expired {
                sessions.remove(lessee);
            }
            expired
        };

        for lessee in &expired {
            tracing::warn!(%lessee, "session expired");
            self.publish(*lessee);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    fn publish(&self, lessee: LesseeId) {
        if !self.notifier.notify(lessee) {
            tracing::error!(%lessee, "disconnect listener is gone; leases stay held");
        }
    }
}

/// Reaps expired sessions every `interval` until `cancel` fires.
pub async fn run_reaper(
    sessions: Arc<SessionRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            now = ticker.tick() => {
                let expired = sessions.reap(now);
                if !expired.is_empty() {
                    tracing::debug!(count = expired.len(), "reaped sessions");
                }
            }
        }
    }

    tracing::debug!("session reaper stopped");
}
