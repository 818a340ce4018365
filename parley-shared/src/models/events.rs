//! Wire protocol for the conversation socket.
//!
//! Clients speak [`ClientFrame`]s; the server answers with [`ServerFrame`]s.
//! The first frame on a fresh connection must be an attach frame; everything
//! else is rejected until the connection is bound to a thread.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{Message, PartyKind};

/// How a connection binds itself to a thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum AttachFrame {
    /// Widget side: the thread secret is the whole credential.
    Guest {
        website_id: Uuid,
        thread_secret: String,
    },
    /// Dashboard side: a session token plus a thread the member owns.
    Member { thread_id: Uuid, token: String },
}

/// Frames a client may send after the socket is open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Attach(AttachFrame),
    SendMessage {
        body: String,
        #[serde(default)]
        attachments: Vec<String>,
    },
    Typing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        typing_id: Option<Uuid>,
    },
    MarkSeen,
}

/// Frames the server pushes to a connection.
///
/// `NewMessage`, `Typing`, and `SeenChanged` fan out to every peer attached
/// to the thread; the rest are addressed to a single connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Attach succeeded; the connection is now streaming this thread.
    Attached { thread_id: Uuid },
    /// A peer appended a message.
    NewMessage { message: Message },
    /// A peer signalled typing. Superseded by the next typing frame.
    Typing {
        thread_id: Uuid,
        party: PartyKind,
        typing_id: Uuid,
    },
    /// A peer marked messages seen.
    SeenChanged {
        thread_id: Uuid,
        seen_by: PartyKind,
        updated: u64,
    },
    /// Receipt to the sender: its message was persisted.
    MessageAccepted { message: Message },
    /// Receipt to the sender of a typing frame, carrying the session id.
    TypingAccepted { typing_id: Uuid },
    /// A request failed. `unauthorized` closes the connection; validation and
    /// persistence errors leave it open.
    Error { code: String, message: String },
}

impl ServerFrame {
    /// Ephemeral frames may be dropped under backpressure; everything else
    /// must reach the peer or terminate the connection.
    #[must_use]
    pub const fn is_ephemeral(&self) -> bool {
        matches!(self, ServerFrame::Typing { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn client_frames_parse_from_tagged_json() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"send_message","body":"hello"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::SendMessage {
                body: "hello".into(),
                attachments: vec![],
            }
        );

        let frame: ClientFrame = serde_json::from_str(r#"{"type":"mark_seen"}"#).unwrap();
        assert_eq!(frame, ClientFrame::MarkSeen);

        let frame: ClientFrame = serde_json::from_str(r#"{"type":"typing"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Typing { typing_id: None });
    }

    #[test]
    fn guest_attach_parses() {
        let website_id = Uuid::new_v4();
        let json = format!(
            r#"{{"type":"attach","role":"guest","website_id":"{website_id}","thread_secret":"abc"}}"#
        );
        let frame: ClientFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Attach(AttachFrame::Guest {
                website_id,
                thread_secret: "abc".into(),
            })
        );
    }

    #[test]
    fn only_typing_is_ephemeral() {
        let typing = ServerFrame::Typing {
            thread_id: Uuid::new_v4(),
            party: PartyKind::Guest,
            typing_id: Uuid::new_v4(),
        };
        assert!(typing.is_ephemeral());

        let message = ServerFrame::NewMessage {
            message: Message {
                id: Uuid::new_v4(),
                thread_id: Uuid::new_v4(),
                author: PartyKind::Member,
                body: "hi".into(),
                seen: false,
                created: Utc::now(),
                attachments: vec![],
            },
        };
        assert!(!message.is_ephemeral());
        assert!(
            !ServerFrame::SeenChanged {
                thread_id: Uuid::new_v4(),
                seen_by: PartyKind::Member,
                updated: 1,
            }
            .is_ephemeral()
        );
    }

    #[test]
    fn server_frame_wire_shape_is_snake_case() {
        let frame = ServerFrame::SeenChanged {
            thread_id: Uuid::new_v4(),
            seen_by: PartyKind::Guest,
            updated: 4,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "seen_changed");
        assert_eq!(json["seen_by"], "guest");
    }
}
