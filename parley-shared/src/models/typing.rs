use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// REST body for a typing signal. Carrying the id from a previous ack lets
/// the client refresh its typing session instead of inserting a new row per
/// keystroke.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct TypingPing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typing_id: Option<Uuid>,
}

/// Ack for a typing signal: the session id to refresh with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct TypingAck {
    pub typing_id: Uuid,
}

/// Poll-fallback answer to "is the other side typing right now?".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct TypingStatus {
    pub typing: bool,
}
