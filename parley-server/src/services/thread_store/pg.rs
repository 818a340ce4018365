use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use shared::models::{
    Attachment, Message, MessagePage, PartyKind, Thread, ThreadSummary, ThreadUnseen,
};

use super::{NewThread, StoreError, StoreResult, ThreadStore, generate_secret};

/// Postgres-backed [`ThreadStore`].
#[derive(Debug, Clone)]
pub struct PgThreadStore {
    pool: PgPool,
}

impl PgThreadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ThreadRow {
    id: Uuid,
    secret: String,
    member_id: Uuid,
    website_id: Uuid,
    guest_id: Uuid,
    created: DateTime<Utc>,
}

impl From<ThreadRow> for Thread {
    fn from(row: ThreadRow) -> Self {
        Thread {
            id: row.id,
            secret: row.secret,
            member_id: row.member_id,
            website_id: row.website_id,
            guest_id: row.guest_id,
            created: row.created,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    thread_id: Uuid,
    author: String,
    body: String,
    seen: bool,
    created: DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self, attachments: Vec<Attachment>) -> Message {
        Message {
            id: self.id,
            thread_id: self.thread_id,
            author: PartyKind::try_from(self.author.as_str()).unwrap_or(PartyKind::Guest),
            body: self.body,
            seen: self.seen,
            created: self.created,
            attachments,
        }
    }
}

#[async_trait]
impl ThreadStore for PgThreadStore {
    #[instrument(name = "store.create_thread", skip(self, new), err)]
    async fn create_thread(&self, new: NewThread) -> StoreResult<Thread> {
        let mut tx = self.pool.begin().await?;

        let guest_id: Uuid = sqlx::query_scalar(
            "INSERT INTO guests (id, name, email, ip, latitude, longitude)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(&new.guest.name)
        .bind(&new.guest.email)
        .bind(&new.guest.ip)
        .bind(new.guest.latitude)
        .bind(new.guest.longitude)
        .fetch_one(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, ThreadRow>(
            "INSERT INTO threads (id, secret, member_id, website_id, guest_id)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, secret, member_id, website_id, guest_id, created",
        )
        .bind(Uuid::new_v4())
        .bind(generate_secret())
        .bind(new.member_id)
        .bind(new.website_id)
        .bind(guest_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    #[instrument(name = "store.thread_by_secret", skip_all, err)]
    async fn thread_by_secret(&self, secret: &str) -> StoreResult<Option<Thread>> {
        let row = sqlx::query_as::<_, ThreadRow>(
            "SELECT id, secret, member_id, website_id, guest_id, created
             FROM threads
             WHERE secret = $1",
        )
        .bind(secret)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Thread::from))
    }

    #[instrument(name = "store.thread_for_member", skip(self), err)]
    async fn thread_for_member(
        &self,
        thread_id: Uuid,
        member_id: Uuid,
    ) -> StoreResult<Option<Thread>> {
        let row = sqlx::query_as::<_, ThreadRow>(
            "SELECT id, secret, member_id, website_id, guest_id, created
             FROM threads
             WHERE id = $1 AND member_id = $2",
        )
        .bind(thread_id)
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Thread::from))
    }

    #[instrument(name = "store.website_owner", skip(self), err)]
    async fn website_owner(&self, website_id: Uuid) -> StoreResult<Option<Uuid>> {
        let owner = sqlx::query_scalar("SELECT member_id FROM websites WHERE id = $1")
            .bind(website_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(owner)
    }

    #[instrument(name = "store.append_message", skip(self, body, attachment_links), err)]
    async fn append_message(
        &self,
        thread_id: Uuid,
        author: PartyKind,
        body: &str,
        attachment_links: &[String],
    ) -> StoreResult<Message> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, MessageRow>(
            "INSERT INTO messages (id, thread_id, author, body)
             VALUES ($1, $2, $3, $4)
             RETURNING id, thread_id, author, body, seen, created",
        )
        .bind(Uuid::new_v4())
        .bind(thread_id)
        .bind(author.as_str())
        .bind(body)
        .fetch_one(&mut *tx)
        .await?;

        let mut attachments = Vec::with_capacity(attachment_links.len());
        for link in attachment_links {
            let attachment = sqlx::query_as::<_, AttachmentRow>(
                "INSERT INTO attachments (id, message_id, link)
                 VALUES ($1, $2, $3)
                 RETURNING id, message_id, link, created",
            )
            .bind(Uuid::new_v4())
            .bind(row.id)
            .bind(link)
            .fetch_one(&mut *tx)
            .await?;
            attachments.push(attachment.into());
        }

        tx.commit().await?;
        Ok(row.into_message(attachments))
    }

    #[instrument(name = "store.mark_seen", skip(self), err)]
    async fn mark_seen(&self, thread_id: Uuid, viewer: PartyKind) -> StoreResult<u64> {
        // Single statement keeps the flip atomic per thread.
        let result = sqlx::query(
            "UPDATE messages
             SET seen = TRUE
             WHERE thread_id = $1 AND author <> $2 AND seen = FALSE",
        )
        .bind(thread_id)
        .bind(viewer.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(name = "store.list_messages", skip(self), err)]
    async fn list_messages(
        &self,
        thread_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> StoreResult<MessagePage> {
        let page = page.max(1);
        let offset = i64::from(page - 1) * i64::from(page_size);

        let mut rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, thread_id, author, body, seen, created
             FROM messages
             WHERE thread_id = $1
             ORDER BY created DESC, id DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(thread_id)
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        // Newest-first window, flipped so the page reads top-down.
        rows.reverse();

        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let attachment_rows = sqlx::query_as::<_, AttachmentRow>(
            "SELECT id, message_id, link, created
             FROM attachments
             WHERE message_id = ANY($1)
             ORDER BY created, id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let messages = rows
            .into_iter()
            .map(|row| {
                let attachments = attachment_rows
                    .iter()
                    .filter(|attachment| attachment.message_id == row.id)
                    .cloned()
                    .map(Attachment::from)
                    .collect();
                row.into_message(attachments)
            })
            .collect();

        Ok(MessagePage {
            page,
            page_size,
            messages,
        })
    }

    #[instrument(name = "store.threads_updated_since", skip(self), err)]
    async fn threads_updated_since(
        &self,
        member_id: Uuid,
        since: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ThreadSummary>> {
        #[derive(sqlx::FromRow)]
        struct SummaryRow {
            id: Uuid,
            guest_id: Uuid,
            guest_name: Option<String>,
            last_message: Option<String>,
            last_activity_at: DateTime<Utc>,
            created: DateTime<Utc>,
        }

        let rows = sqlx::query_as::<_, SummaryRow>(
            "SELECT t.id, t.guest_id, g.name AS guest_name, t.created,
                    m.body AS last_message,
                    COALESCE(m.created, t.created) AS last_activity_at
             FROM threads t
             JOIN guests g ON g.id = t.guest_id
             LEFT JOIN LATERAL (
                 SELECT body, created
                 FROM messages
                 WHERE thread_id = t.id
                 ORDER BY created DESC, id DESC
                 LIMIT 1
             ) m ON TRUE
             WHERE t.member_id = $1 AND COALESCE(m.created, t.created) > $2
             ORDER BY last_activity_at DESC
             LIMIT $3",
        )
        .bind(member_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ThreadSummary {
                id: row.id,
                guest_id: row.guest_id,
                guest_name: row.guest_name,
                last_message: row.last_message,
                last_activity_at: row.last_activity_at,
                created: row.created,
            })
            .collect())
    }

    #[instrument(name = "store.delete_thread", skip(self), err)]
    async fn delete_thread(&self, thread_id: Uuid, member_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM threads WHERE id = $1 AND member_id = $2")
            .bind(thread_id)
            .bind(member_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("thread {thread_id}")));
        }
        Ok(())
    }

    #[instrument(name = "store.unseen_by_thread", skip(self), err)]
    async fn unseen_by_thread(&self, member_id: Uuid) -> StoreResult<Vec<ThreadUnseen>> {
        #[derive(sqlx::FromRow)]
        struct UnseenRow {
            thread_id: Uuid,
            unseen: i64,
        }

        let rows = sqlx::query_as::<_, UnseenRow>(
            "SELECT m.thread_id, COUNT(*) AS unseen
             FROM messages m
             JOIN threads t ON t.id = m.thread_id
             WHERE t.member_id = $1 AND m.author = 'guest' AND m.seen = FALSE
             GROUP BY m.thread_id",
        )
        .bind(member_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ThreadUnseen {
                thread_id: row.thread_id,
                unseen: row.unseen,
            })
            .collect())
    }

    #[instrument(name = "store.record_typing", skip(self), err)]
    async fn record_typing(&self, thread_id: Uuid, party: PartyKind) -> StoreResult<Uuid> {
        let typing_id: Uuid = sqlx::query_scalar(
            "INSERT INTO typing (id, thread_id, party) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(thread_id)
        .bind(party.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(typing_id)
    }

    #[instrument(name = "store.refresh_typing", skip(self), err)]
    async fn refresh_typing(&self, typing_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("UPDATE typing SET updated = now() WHERE id = $1")
            .bind(typing_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("typing session {typing_id}")));
        }
        Ok(())
    }

    #[instrument(name = "store.latest_typing", skip(self), err)]
    async fn latest_typing(
        &self,
        thread_id: Uuid,
        party: PartyKind,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let updated = sqlx::query_scalar(
            "SELECT updated FROM typing
             WHERE thread_id = $1 AND party = $2
             ORDER BY updated DESC
             LIMIT 1",
        )
        .bind(thread_id)
        .bind(party.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }

    #[instrument(name = "store.prune_typing", skip(self), err)]
    async fn prune_typing(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM typing WHERE updated < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[derive(Clone, sqlx::FromRow)]
struct AttachmentRow {
    id: Uuid,
    message_id: Uuid,
    link: String,
    created: DateTime<Utc>,
}

impl From<AttachmentRow> for Attachment {
    fn from(row: AttachmentRow) -> Self {
        Attachment {
            id: row.id,
            message_id: row.message_id,
            link: row.link,
            created: row.created,
        }
    }
}
