use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{GuestProfile, Message};

/// One guest-to-member conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Thread {
    /// Durable identity of the conversation.
    pub id: Uuid,

    /// Opaque token handed to the guest's browser so it can reattach to its
    /// thread without server-side session state. Unique, and the only
    /// guest-side credential; not derivable from `id`.
    pub secret: String,

    /// The site owner the conversation belongs to.
    pub member_id: Uuid,

    /// Which embedded widget instance opened the conversation.
    pub website_id: Uuid,

    /// The visitor on the other side.
    pub guest_id: Uuid,

    /// When the conversation was opened.
    pub created: DateTime<Utc>,
}

/// Dashboard view of a thread: enough to render the conversation list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ThreadSummary {
    pub id: Uuid,
    pub guest_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    pub last_activity_at: DateTime<Utc>,
    pub created: DateTime<Utc>,
}

/// Poll-fallback response for "threads updated since T".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ThreadListResponse {
    pub threads: Vec<ThreadSummary>,
    /// Cursor for the next poll, the newest activity timestamp seen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_since: Option<DateTime<Utc>>,
}

/// Widget request opening a thread, or reattaching to one, with the guest's
/// first message of the visit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct OpenThreadRequest {
    pub website_id: Uuid,

    /// Secret from a previous visit; absent or unknown secrets open a fresh
    /// thread with a fresh guest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_secret: Option<String>,

    #[serde(default)]
    pub guest: GuestProfile,

    pub body: String,

    #[serde(default)]
    pub attachments: Vec<String>,
}

/// Widget response: the secret to persist client-side plus the appended message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct OpenThreadResponse {
    pub thread_id: Uuid,
    pub thread_secret: String,
    pub message: Message,
}
