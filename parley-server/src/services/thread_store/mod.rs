//! The repository contract the conversation engine consumes.
//!
//! The engine never talks to the persistence layer directly; everything goes
//! through [`ThreadStore`]. [`pg::PgThreadStore`] is the production
//! implementation, [`memory::MemoryThreadStore`] backs local development and
//! tests.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::RngCore;
use thiserror::Error;
use uuid::Uuid;

use shared::models::{Message, MessagePage, PartyKind, Thread, ThreadSummary, ThreadUnseen};

pub mod memory;
pub mod pg;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Guest profile captured when a thread is first opened.
#[derive(Debug, Clone, Default)]
pub struct NewGuest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub ip: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Everything needed to open a fresh thread.
#[derive(Debug, Clone)]
pub struct NewThread {
    pub website_id: Uuid,
    pub member_id: Uuid,
    pub guest: NewGuest,
}

/// Narrow persistence contract for threads, messages, and typing rows.
///
/// Absence is modelled with `Option`/`NotFound`; only infrastructure
/// failures surface as [`StoreError::Persistence`]. Duplicate thread
/// creation under concurrent first contacts is tolerated; callers check
/// [`ThreadStore::thread_by_secret`] first.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Inserts the guest and a thread with a freshly generated secret.
    async fn create_thread(&self, new: NewThread) -> StoreResult<Thread>;

    /// Looks a thread up by its guest-side secret. Secrets are globally
    /// unique, so this is the whole guest credential check.
    async fn thread_by_secret(&self, secret: &str) -> StoreResult<Option<Thread>>;

    /// Looks a thread up for a member. Returns `None` when the thread does
    /// not exist *or* belongs to a different member; the caller cannot tell
    /// the two apart, which is the authorization boundary.
    async fn thread_for_member(
        &self,
        thread_id: Uuid,
        member_id: Uuid,
    ) -> StoreResult<Option<Thread>>;

    /// Resolves the member owning a widget installation.
    async fn website_owner(&self, website_id: Uuid) -> StoreResult<Option<Uuid>>;

    /// Appends to the thread's message log. Threads never close, so this
    /// never rejects based on thread state.
    async fn append_message(
        &self,
        thread_id: Uuid,
        author: PartyKind,
        body: &str,
        attachment_links: &[String],
    ) -> StoreResult<Message>;

    /// Flips `seen` on every message in the thread not authored by the
    /// viewer, atomically. Idempotent: the second call reports 0.
    async fn mark_seen(&self, thread_id: Uuid, viewer: PartyKind) -> StoreResult<u64>;

    /// One page of the log. Page 1 is the newest window; rows within a page
    /// run oldest to newest, ordered by `created` then id.
    async fn list_messages(
        &self,
        thread_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> StoreResult<MessagePage>;

    /// Threads of the member with activity after `since`, newest first.
    async fn threads_updated_since(
        &self,
        member_id: Uuid,
        since: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ThreadSummary>>;

    /// Deletes the thread and cascades to messages, attachments, and typing
    /// rows. `NotFound` when the member does not own the thread.
    async fn delete_thread(&self, thread_id: Uuid, member_id: Uuid) -> StoreResult<()>;

    /// Unseen guest-authored message counts per thread of the member.
    async fn unseen_by_thread(&self, member_id: Uuid) -> StoreResult<Vec<ThreadUnseen>>;

    /// Appends a typing row stamped now and returns its id. A fresh row per
    /// signal keeps concurrent typers off a shared hot record.
    async fn record_typing(&self, thread_id: Uuid, party: PartyKind) -> StoreResult<Uuid>;

    /// Bumps an existing typing row to now. `NotFound` once the row has been
    /// reclaimed, at which point the client records a fresh one.
    async fn refresh_typing(&self, typing_id: Uuid) -> StoreResult<()>;

    /// Timestamp of the most recent typing row for the pair, if any.
    async fn latest_typing(
        &self,
        thread_id: Uuid,
        party: PartyKind,
    ) -> StoreResult<Option<DateTime<Utc>>>;

    /// Deletes typing rows older than the cutoff, returning how many went.
    async fn prune_typing(&self, older_than: DateTime<Utc>) -> StoreResult<u64>;
}

/// Generates a guest-side thread secret: 32 random bytes, URL-safe base64.
/// Never derivable from the thread id.
pub(crate) fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_unique_and_opaque() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43); // 32 bytes, base64 no-pad
        assert!(!a.contains('='));
    }
}
