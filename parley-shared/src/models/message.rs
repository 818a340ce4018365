use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::PartyKind;

/// A single message in a thread's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Message {
    /// Unique identifier for the message.
    pub id: Uuid,

    /// The thread this message belongs to.
    pub thread_id: Uuid,

    /// Which side of the conversation authored the message.
    pub author: PartyKind,

    /// The message body. Non-empty, bounded length.
    pub body: String,

    /// Whether the non-authoring party has seen this message.
    /// Transitions only from `false` to `true`, never backward.
    pub seen: bool,

    /// When the message was appended.
    pub created: DateTime<Utc>,

    /// Links attached to the message, oldest first.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// A link attached to a message. Cannot outlive its message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Attachment {
    pub id: Uuid,
    pub message_id: Uuid,
    pub link: String,
    pub created: DateTime<Utc>,
}

/// Request body for appending a message over REST.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct PostMessageRequest {
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// One page of a thread's message log.
///
/// Page 1 is the most recent window; within a page messages run
/// oldest to newest so a client can render them top-down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct MessagePage {
    pub page: u32,
    pub page_size: u32,
    pub messages: Vec<Message>,
}

/// Result of a mark-seen call: how many messages flipped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct MarkSeenResponse {
    pub updated: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_message() -> Message {
        let dt = Utc.with_ymd_and_hms(2025, 11, 2, 9, 15, 0).unwrap();
        Message {
            id: Uuid::new_v4(),
            thread_id: Uuid::new_v4(),
            author: PartyKind::Guest,
            body: "Hello there".to_string(),
            seen: false,
            created: dt,
            attachments: vec![],
        }
    }

    #[test]
    fn message_serialization_round_trips() {
        let message = sample_message();
        let json = serde_json::to_string(&message).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
        assert_eq!(back.author, PartyKind::Guest);
        assert!(!back.seen);
    }

    #[test]
    fn attachments_default_to_empty() {
        let mut json = serde_json::to_value(sample_message()).unwrap();
        json.as_object_mut().unwrap().remove("attachments");
        let back: Message = serde_json::from_value(json).unwrap();
        assert!(back.attachments.is_empty());
    }

    #[test]
    fn post_request_accepts_missing_attachments() {
        let request: PostMessageRequest = serde_json::from_str(r#"{"body":"hi"}"#).unwrap();
        assert_eq!(request.body, "hi");
        assert!(request.attachments.is_empty());
    }
}
