//! Timeout Sweeper
//!
//! Members who join and never verify would otherwise stay restricted
//! forever. The sweeper ticks on a fixed interval, independent of event
//! arrival: it expires pending sessions past the window, bans them for the
//! penalty duration, and cleans up their onboarding messages. The store's
//! compare-and-set decides every expiry, so a proof that lands concurrently
//! is never punished.

use super::store::{now_unix, SessionState, SessionStore, PENDING_STATES};
use super::trail::delete_trail;
use crate::chat::{ChatTransport, EnforcementActions};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Periodic expiry of abandoned verification sessions
pub struct TimeoutSweeper<T: ChatTransport> {
    store: Arc<SessionStore>,
    enforcement: EnforcementActions<T>,
    transport: T,
    window: Duration,
    penalty: Duration,
    interval: Duration,
}

impl<T: ChatTransport> TimeoutSweeper<T> {
    pub fn new(
        store: Arc<SessionStore>,
        enforcement: EnforcementActions<T>,
        transport: T,
        window: Duration,
        penalty: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            enforcement,
            transport,
            window,
            penalty,
            interval,
        }
    }

    /// Tick forever; callers `tokio::spawn` this.
    pub async fn run(self) {
        info!(
            window_secs = self.window.as_secs(),
            interval_secs = self.interval.as_secs(),
            "timeout sweeper running"
        );
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.sweep_once(now_unix()).await;
        }
    }

    /// One sweep pass at the given instant; returns how many sessions
    /// expired. Public so tests can drive ticks deterministically.
    pub async fn sweep_once(&self, now: u64) -> usize {
        let deadline = now.saturating_sub(self.window.as_secs());
        let candidates = self.store.expired_before(deadline).await;
        if candidates.is_empty() {
            return 0;
        }
        debug!(count = candidates.len(), "expiry candidates found");

        let mut expired = 0;
        for candidate in candidates {
            let user = candidate.user_id;

            // The CAS is the race guard: a webhook that admitted or rejected
            // this user in the meantime moved the state out of pending, and
            // this sweep must not touch them.
            if !self
                .store
                .advance(user, PENDING_STATES, SessionState::Expired)
                .await
            {
                continue;
            }
            let Some(session) = self.store.finish(user, SessionState::Expired).await else {
                continue;
            };
            expired += 1;

            info!(%user, "verification timed out, banning");
            let until = now + self.penalty.as_secs();
            if let Err(e) = self.enforcement.ban_until(user, until).await {
                // The session is already removed, so no tick retries this
                // ban; an unbanned leftover is the accepted lost-enforcement
                // case and shows up in the logs.
                warn!(%user, error = %e, "timeout ban failed");
            }
            delete_trail(&self.transport, session.trail.entries()).await;
        }
        expired
    }
}
