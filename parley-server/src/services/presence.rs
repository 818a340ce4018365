//! Typing presence: short-lived "party X is typing in thread Y" state.
//!
//! Typing is best-effort by contract. Every failure in here is logged and
//! swallowed; a lost typing signal is never worth failing a connection over.

use chrono::{TimeDelta, Utc};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};
use uuid::Uuid;

use shared::models::PartyKind;

use super::thread_store::{StoreError, ThreadStore};

/// Records typing signals and answers freshness queries against the store's
/// append-only typing log.
pub struct PresenceTracker {
    store: Arc<dyn ThreadStore>,
    window: TimeDelta,
}

impl std::fmt::Debug for PresenceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceTracker")
            .field("window", &self.window)
            .finish()
    }
}

impl PresenceTracker {
    #[must_use]
    pub fn new(store: Arc<dyn ThreadStore>, window: Duration) -> Self {
        Self {
            store,
            window: TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Records a typing signal. With a `typing_id` from a previous ack the
    /// existing row is bumped; otherwise (or once the row has been pruned) a
    /// fresh row is appended. Returns the id to use for the next refresh, or
    /// `None` when the store was unavailable.
    pub async fn signal(
        &self,
        thread_id: Uuid,
        party: PartyKind,
        typing_id: Option<Uuid>,
    ) -> Option<Uuid> {
        if let Some(typing_id) = typing_id {
            match self.store.refresh_typing(typing_id).await {
                Ok(()) => return Some(typing_id),
                Err(StoreError::NotFound(_)) => {}
                Err(err) => {
                    warn!(%thread_id, "typing refresh failed: {err}");
                    return None;
                }
            }
        }

        match self.store.record_typing(thread_id, party).await {
            Ok(typing_id) => Some(typing_id),
            Err(err) => {
                warn!(%thread_id, "typing record failed: {err}");
                None
            }
        }
    }

    /// Whether the party has signalled typing within the freshness window.
    /// `false` when no row exists or the store was unavailable.
    pub async fn is_typing(&self, thread_id: Uuid, party: PartyKind) -> bool {
        match self.store.latest_typing(thread_id, party).await {
            Ok(Some(updated)) => Utc::now().signed_duration_since(updated) <= self.window,
            Ok(None) => false,
            Err(err) => {
                warn!(%thread_id, "typing lookup failed: {err}");
                false
            }
        }
    }

    /// Spawns the background reclamation job for stale typing rows. Cleanup
    /// is hygiene, not correctness: freshness queries already ignore stale
    /// rows.
    pub fn spawn_reclamation(self: &Arc<Self>, every: Duration) {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                let cutoff = Utc::now() - tracker.window;
                match tracker.store.prune_typing(cutoff).await {
                    Ok(0) => {}
                    Ok(pruned) => {
                        metrics::counter!("parley_typing_rows_pruned_total").increment(pruned);
                        debug!(pruned, "reclaimed stale typing rows");
                    }
                    Err(err) => warn!("typing reclamation failed: {err}"),
                }
            }
        });
    }
}
