use axum::{Json, Router, response::IntoResponse, routing::get};
use utoipa::OpenApi;

use shared::models::{
    Attachment, ErrorResponse, Guest, GuestProfile, MarkSeenResponse, Message, MessagePage,
    OpenThreadRequest, OpenThreadResponse, Party, PartyKind, PostMessageRequest, Thread,
    ThreadListResponse, ThreadSummary, ThreadUnseen, TypingAck, TypingPing, TypingStatus,
    UnseenSummary,
};

/// OpenAPI description of the REST surface. The socket protocol is
/// documented by the frame schemas in `shared::models::events`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Parley API",
        description = "Embeddable live-chat: widget, dashboard, and polling fallback endpoints."
    ),
    paths(
        crate::handlers::widget::open_thread,
        crate::handlers::widget::list_messages,
        crate::handlers::widget::post_message,
        crate::handlers::widget::mark_seen,
        crate::handlers::widget::typing_ping,
        crate::handlers::widget::typing_status,
        crate::handlers::threads::list_threads,
        crate::handlers::threads::thread_messages,
        crate::handlers::threads::post_message,
        crate::handlers::threads::mark_seen,
        crate::handlers::threads::typing_ping,
        crate::handlers::threads::typing_status,
        crate::handlers::threads::delete_thread,
        crate::handlers::threads::unseen,
    ),
    components(schemas(
        Attachment,
        ErrorResponse,
        Guest,
        GuestProfile,
        MarkSeenResponse,
        Message,
        MessagePage,
        OpenThreadRequest,
        OpenThreadResponse,
        Party,
        PartyKind,
        PostMessageRequest,
        Thread,
        ThreadListResponse,
        ThreadSummary,
        ThreadUnseen,
        TypingAck,
        TypingPing,
        TypingStatus,
        UnseenSummary,
    )),
    tags(
        (name = "Widget", description = "Guest-facing endpoints, addressed by thread secret"),
        (name = "Dashboard", description = "Member endpoints behind session auth"),
    )
)]
pub struct ApiDoc;

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

pub fn routes() -> Router {
    Router::new().route("/openapi.json", get(openapi_json))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_covers_both_surfaces() {
        let doc = ApiDoc::openapi();
        let paths: Vec<_> = doc.paths.paths.keys().cloned().collect();
        assert!(paths.iter().any(|p| p.starts_with("/api/widget/")));
        assert!(paths.iter().any(|p| p == "/api/unseen"));
        assert!(paths.iter().any(|p| p == "/api/threads"));
    }
}
