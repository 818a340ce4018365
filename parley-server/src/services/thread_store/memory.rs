use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use shared::models::{
    Attachment, Guest, Message, MessagePage, PartyKind, Thread, ThreadSummary, ThreadUnseen,
};

use super::{NewThread, StoreError, StoreResult, ThreadStore, generate_secret};

/// In-process [`ThreadStore`] used for local development (no database URL
/// configured) and by the test suite. Same contract, no durability.
#[derive(Debug, Default)]
pub struct MemoryThreadStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    websites: HashMap<Uuid, Uuid>,
    guests: HashMap<Uuid, Guest>,
    threads: HashMap<Uuid, Thread>,
    messages: HashMap<Uuid, Vec<Message>>,
    typing: Vec<TypingRow>,
}

#[derive(Debug, Clone)]
struct TypingRow {
    id: Uuid,
    thread_id: Uuid,
    party: PartyKind,
    updated: DateTime<Utc>,
}

impl MemoryThreadStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a widget installation for a member and returns its id.
    /// Website CRUD proper lives outside the engine; this seeds the mapping
    /// the engine reads.
    pub async fn register_website(&self, member_id: Uuid) -> Uuid {
        let website_id = Uuid::new_v4();
        self.inner
            .write()
            .await
            .websites
            .insert(website_id, member_id);
        website_id
    }
}

fn sorted_messages(inner: &Inner, thread_id: Uuid) -> Vec<Message> {
    let mut messages = inner
        .messages
        .get(&thread_id)
        .cloned()
        .unwrap_or_default();
    messages.sort_by(|a, b| (a.created, a.id).cmp(&(b.created, b.id)));
    messages
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn create_thread(&self, new: NewThread) -> StoreResult<Thread> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let guest = Guest {
            id: Uuid::new_v4(),
            name: new.guest.name,
            email: new.guest.email,
            ip: new.guest.ip,
            latitude: new.guest.latitude,
            longitude: new.guest.longitude,
            created: now,
        };

        let thread = Thread {
            id: Uuid::new_v4(),
            secret: generate_secret(),
            member_id: new.member_id,
            website_id: new.website_id,
            guest_id: guest.id,
            created: now,
        };

        inner.guests.insert(guest.id, guest);
        inner.threads.insert(thread.id, thread.clone());
        inner.messages.insert(thread.id, Vec::new());
        Ok(thread)
    }

    async fn thread_by_secret(&self, secret: &str) -> StoreResult<Option<Thread>> {
        let inner = self.inner.read().await;
        Ok(inner
            .threads
            .values()
            .find(|thread| thread.secret == secret)
            .cloned())
    }

    async fn thread_for_member(
        &self,
        thread_id: Uuid,
        member_id: Uuid,
    ) -> StoreResult<Option<Thread>> {
        let inner = self.inner.read().await;
        Ok(inner
            .threads
            .get(&thread_id)
            .filter(|thread| thread.member_id == member_id)
            .cloned())
    }

    async fn website_owner(&self, website_id: Uuid) -> StoreResult<Option<Uuid>> {
        Ok(self.inner.read().await.websites.get(&website_id).copied())
    }

    async fn append_message(
        &self,
        thread_id: Uuid,
        author: PartyKind,
        body: &str,
        attachment_links: &[String],
    ) -> StoreResult<Message> {
        let mut inner = self.inner.write().await;
        if !inner.threads.contains_key(&thread_id) {
            return Err(StoreError::NotFound(format!("thread {thread_id}")));
        }

        let now = Utc::now();
        let message_id = Uuid::new_v4();
        let message = Message {
            id: message_id,
            thread_id,
            author,
            body: body.to_string(),
            seen: false,
            created: now,
            attachments: attachment_links
                .iter()
                .map(|link| Attachment {
                    id: Uuid::new_v4(),
                    message_id,
                    link: link.clone(),
                    created: now,
                })
                .collect(),
        };

        inner
            .messages
            .entry(thread_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn mark_seen(&self, thread_id: Uuid, viewer: PartyKind) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let mut updated = 0;
        if let Some(messages) = inner.messages.get_mut(&thread_id) {
            for message in messages.iter_mut() {
                if message.author != viewer && !message.seen {
                    message.seen = true;
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn list_messages(
        &self,
        thread_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> StoreResult<MessagePage> {
        let inner = self.inner.read().await;
        let messages = sorted_messages(&inner, thread_id);

        let page = page.max(1);
        let size = page_size as usize;
        let end = messages.len().saturating_sub((page as usize - 1) * size);
        let start = end.saturating_sub(size);

        Ok(MessagePage {
            page,
            page_size,
            messages: messages[start..end].to_vec(),
        })
    }

    async fn threads_updated_since(
        &self,
        member_id: Uuid,
        since: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ThreadSummary>> {
        let inner = self.inner.read().await;

        let mut summaries: Vec<ThreadSummary> = inner
            .threads
            .values()
            .filter(|thread| thread.member_id == member_id)
            .filter_map(|thread| {
                let messages = sorted_messages(&inner, thread.id);
                let last = messages.last();
                let last_activity_at = last.map_or(thread.created, |message| message.created);
                if last_activity_at <= since {
                    return None;
                }
                Some(ThreadSummary {
                    id: thread.id,
                    guest_id: thread.guest_id,
                    guest_name: inner
                        .guests
                        .get(&thread.guest_id)
                        .and_then(|guest| guest.name.clone()),
                    last_message: last.map(|message| message.body.clone()),
                    last_activity_at,
                    created: thread.created,
                })
            })
            .collect();

        summaries.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        summaries.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(summaries)
    }

    async fn delete_thread(&self, thread_id: Uuid, member_id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let owned = inner
            .threads
            .get(&thread_id)
            .is_some_and(|thread| thread.member_id == member_id);
        if !owned {
            return Err(StoreError::NotFound(format!("thread {thread_id}")));
        }

        inner.threads.remove(&thread_id);
        inner.messages.remove(&thread_id);
        inner.typing.retain(|row| row.thread_id != thread_id);
        Ok(())
    }

    async fn unseen_by_thread(&self, member_id: Uuid) -> StoreResult<Vec<ThreadUnseen>> {
        let inner = self.inner.read().await;
        let mut result = Vec::new();
        for thread in inner.threads.values() {
            if thread.member_id != member_id {
                continue;
            }
            let unseen = inner
                .messages
                .get(&thread.id)
                .map_or(0, |messages| {
                    messages
                        .iter()
                        .filter(|message| message.author == PartyKind::Guest && !message.seen)
                        .count()
                });
            if unseen > 0 {
                result.push(ThreadUnseen {
                    thread_id: thread.id,
                    unseen: unseen as i64,
                });
            }
        }
        Ok(result)
    }

    async fn record_typing(&self, thread_id: Uuid, party: PartyKind) -> StoreResult<Uuid> {
        let mut inner = self.inner.write().await;
        let row = TypingRow {
            id: Uuid::new_v4(),
            thread_id,
            party,
            updated: Utc::now(),
        };
        let id = row.id;
        inner.typing.push(row);
        Ok(id)
    }

    async fn refresh_typing(&self, typing_id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        match inner.typing.iter_mut().find(|row| row.id == typing_id) {
            Some(row) => {
                row.updated = Utc::now();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("typing session {typing_id}"))),
        }
    }

    async fn latest_typing(
        &self,
        thread_id: Uuid,
        party: PartyKind,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let inner = self.inner.read().await;
        Ok(inner
            .typing
            .iter()
            .filter(|row| row.thread_id == thread_id && row.party == party)
            .map(|row| row.updated)
            .max())
    }

    async fn prune_typing(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.typing.len();
        inner.typing.retain(|row| row.updated >= older_than);
        Ok((before - inner.typing.len()) as u64)
    }
}
