use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use utoipa::ToSchema;
use uuid::Uuid;

/// Which side of a conversation a record belongs to.
///
/// A thread has exactly one guest and one owning member, so the kind alone
/// identifies the author of a message or typing signal within a thread.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PartyKind {
    /// The anonymous visitor chatting through the embedded widget.
    Guest,
    /// The site owner chatting through the dashboard.
    Member,
}

impl PartyKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            PartyKind::Guest => "guest",
            PartyKind::Member => "member",
        }
    }

    /// The opposite side of the conversation.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            PartyKind::Guest => PartyKind::Member,
            PartyKind::Member => PartyKind::Guest,
        }
    }
}

impl TryFrom<&str> for PartyKind {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "guest" => Ok(PartyKind::Guest),
            "member" => Ok(PartyKind::Member),
            other => Err(format!("unknown party kind: {other}")),
        }
    }
}

impl Display for PartyKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// A concrete conversation participant: a guest or a member with its identity.
///
/// Used wherever the individual identity matters (live connections, unseen
/// aggregation), in place of a nullable member foreign key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Party {
    Guest(Uuid),
    Member(Uuid),
}

impl Party {
    #[must_use]
    pub const fn kind(self) -> PartyKind {
        match self {
            Party::Guest(_) => PartyKind::Guest,
            Party::Member(_) => PartyKind::Member,
        }
    }

    #[must_use]
    pub const fn id(self) -> Uuid {
        match self {
            Party::Guest(id) | Party::Member(id) => id,
        }
    }
}
