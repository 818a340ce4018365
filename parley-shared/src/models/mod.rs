pub mod errors;
pub mod events;
pub mod guest;
pub mod message;
pub mod party;
pub mod thread;
pub mod typing;
pub mod unseen;

pub use errors::ErrorResponse;
pub use events::{AttachFrame, ClientFrame, ServerFrame};
pub use guest::{Guest, GuestProfile};
pub use message::{Attachment, MarkSeenResponse, Message, MessagePage, PostMessageRequest};
pub use party::{Party, PartyKind};
pub use thread::{
    OpenThreadRequest, OpenThreadResponse, Thread, ThreadListResponse, ThreadSummary,
};
pub use typing::{TypingAck, TypingPing, TypingStatus};
pub use unseen::{ThreadUnseen, UnseenSummary};
