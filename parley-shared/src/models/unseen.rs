use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Unseen guest messages in one thread.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ThreadUnseen {
    pub thread_id: Uuid,
    pub unseen: i64,
}

/// A member's unseen-message badge: total plus per-thread breakdown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct UnseenSummary {
    pub total: i64,
    pub threads: Vec<ThreadUnseen>,
}

impl UnseenSummary {
    #[must_use]
    pub fn from_threads(threads: Vec<ThreadUnseen>) -> Self {
        let total = threads.iter().map(|entry| entry.unseen).sum();
        Self { total, threads }
    }
}
