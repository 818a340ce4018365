//! Unseen-message aggregation for dashboard badges and polling clients.
//!
//! Counts are derived from the store and cached per member under a tag, so
//! any write touching a member's threads invalidates every cached view for
//! them in one operation.

use std::{sync::Arc, time::Duration};
use tracing::warn;
use uuid::Uuid;

use shared::models::UnseenSummary;

use super::cache::Cache;
use super::thread_store::{StoreResult, ThreadStore};

pub struct UnseenAggregator {
    store: Arc<dyn ThreadStore>,
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl std::fmt::Debug for UnseenAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnseenAggregator")
            .field("ttl", &self.ttl)
            .finish()
    }
}

fn summary_key(member_id: Uuid) -> String {
    format!("unseen:{member_id}:summary")
}

fn member_tag(member_id: Uuid) -> String {
    format!("unseen:{member_id}")
}

impl UnseenAggregator {
    #[must_use]
    pub fn new(store: Arc<dyn ThreadStore>, cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { store, cache, ttl }
    }

    /// The member's unseen badge: total plus per-thread counts.
    pub async fn summary(&self, member_id: Uuid) -> StoreResult<UnseenSummary> {
        let key = summary_key(member_id);

        if let Some(value) = self.cache.get(&key).await {
            match serde_json::from_value(value) {
                Ok(summary) => {
                    metrics::counter!("parley_unseen_cache_hits_total").increment(1);
                    return Ok(summary);
                }
                Err(err) => warn!(%member_id, "discarding bad cached unseen summary: {err}"),
            }
        }
        metrics::counter!("parley_unseen_cache_misses_total").increment(1);

        let threads = self.store.unseen_by_thread(member_id).await?;
        let summary = UnseenSummary::from_threads(threads);

        if let Ok(value) = serde_json::to_value(&summary) {
            self.cache
                .set(&key, value, self.ttl, &[member_tag(member_id)])
                .await;
        }
        Ok(summary)
    }

    pub async fn unseen_count(&self, member_id: Uuid) -> StoreResult<i64> {
        Ok(self.summary(member_id).await?.total)
    }

    /// Drops every cached unseen view for the member. Called after any write
    /// that can change their counts.
    pub async fn invalidate(&self, member_id: Uuid) {
        self.cache.invalidate_tag(&member_tag(member_id)).await;
    }
}
