//! Dashboard REST surface. Every route here sits behind the member auth
//! middleware; handlers read the authenticated member out of the request
//! context and the store's ownership filter does the rest.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use shared::models::{
    MarkSeenResponse, MessagePage, PartyKind, PostMessageRequest, ServerFrame, Thread,
    ThreadListResponse, TypingAck, TypingPing, TypingStatus, UnseenSummary,
};

use crate::{
    app_state::AppState,
    handlers::validate_message_body,
    http::error::{ApiError, AppResult},
    middleware::request_context::RequestContext,
};

pub fn routes() -> Router {
    Router::new()
        .route("/threads", get(list_threads))
        .route(
            "/threads/{thread_id}/messages",
            get(thread_messages).post(post_message),
        )
        .route("/threads/{thread_id}/seen", post(mark_seen))
        .route(
            "/threads/{thread_id}/typing",
            get(typing_status).post(typing_ping),
        )
        .route("/threads/{thread_id}", axum::routing::delete(delete_thread))
        .route("/unseen", get(unseen))
}

fn require_member(context: &RequestContext) -> AppResult<Uuid> {
    context
        .member_id()
        .ok_or_else(|| ApiError::unauthorized("not authenticated"))
}

async fn owned_thread(state: &AppState, thread_id: Uuid, member_id: Uuid) -> AppResult<Thread> {
    state
        .store
        .thread_for_member(thread_id, member_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("thread {thread_id} not found")))
}

#[derive(Debug, Deserialize, Default)]
struct ThreadsQuery {
    updated_since: Option<DateTime<Utc>>,
    limit: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
struct PageQuery {
    page: Option<u32>,
}

/// Poll fallback: threads with activity since the cursor, newest first.
#[utoipa::path(
    get,
    path = "/api/threads",
    params(
        ("updated_since" = Option<DateTime<Utc>>, Query, description = "Cursor from the previous poll"),
        ("limit" = Option<i64>, Query, description = "Maximum threads to return"),
    ),
    responses(
        (status = 200, description = "Threads with recent activity", body = ThreadListResponse),
        (status = 401, description = "Not authenticated"),
    ),
    tag = "Dashboard"
)]
#[instrument(skip(state, context, query))]
pub async fn list_threads(
    Extension(state): Extension<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Query(query): Query<ThreadsQuery>,
) -> AppResult<Json<ThreadListResponse>> {
    let member_id = require_member(&context)?;
    let since = query.updated_since.unwrap_or(DateTime::<Utc>::MIN_UTC);
    let limit = query.limit.unwrap_or(50).clamp(1, 200);

    let threads = state
        .store
        .threads_updated_since(member_id, since, limit)
        .await?;
    let next_since = threads.first().map(|thread| thread.last_activity_at);

    Ok(Json(ThreadListResponse {
        threads,
        next_since,
    }))
}

/// One page of a thread's log, page 1 being the newest window.
#[utoipa::path(
    get,
    path = "/api/threads/{thread_id}/messages",
    params(
        ("thread_id" = Uuid, Path, description = "Thread id"),
        ("page" = Option<u32>, Query, description = "1 is the newest window"),
    ),
    responses(
        (status = 200, description = "One page of messages", body = MessagePage),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Not this member's thread"),
    ),
    tag = "Dashboard"
)]
#[instrument(skip(state, context, query))]
pub async fn thread_messages(
    Extension(state): Extension<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(thread_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<MessagePage>> {
    let member_id = require_member(&context)?;
    let thread = owned_thread(&state, thread_id, member_id).await?;

    let page = state
        .store
        .list_messages(thread.id, query.page.unwrap_or(1), state.config.chat.page_size)
        .await?;
    Ok(Json(page))
}

/// Appends a member reply over REST.
#[utoipa::path(
    post,
    path = "/api/threads/{thread_id}/messages",
    request_body = PostMessageRequest,
    responses(
        (status = 201, description = "Message appended", body = shared::models::Message),
        (status = 400, description = "Invalid message body"),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Not this member's thread"),
        (status = 503, description = "Store unavailable; the client must resend"),
    ),
    tag = "Dashboard"
)]
#[instrument(skip(state, context, payload))]
pub async fn post_message(
    Extension(state): Extension<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(thread_id): Path<Uuid>,
    Json(payload): Json<PostMessageRequest>,
) -> AppResult<impl IntoResponse> {
    let member_id = require_member(&context)?;
    let thread = owned_thread(&state, thread_id, member_id).await?;
    let body = validate_message_body(&payload.body, state.config.chat.message_max_chars)?;

    let message = state
        .store
        .append_message(thread.id, PartyKind::Member, &body, &payload.attachments)
        .await?;

    state
        .dispatcher
        .dispatch(
            thread.id,
            &ServerFrame::NewMessage {
                message: message.clone(),
            },
            None,
        )
        .await;
    state.unseen.invalidate(member_id).await;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Marks every guest-authored message in the thread as seen.
#[utoipa::path(
    post,
    path = "/api/threads/{thread_id}/seen",
    responses(
        (status = 200, description = "Messages flipped", body = MarkSeenResponse),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Not this member's thread"),
    ),
    tag = "Dashboard"
)]
#[instrument(skip(state, context))]
pub async fn mark_seen(
    Extension(state): Extension<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(thread_id): Path<Uuid>,
) -> AppResult<Json<MarkSeenResponse>> {
    let member_id = require_member(&context)?;
    let thread = owned_thread(&state, thread_id, member_id).await?;

    let updated = state.store.mark_seen(thread.id, PartyKind::Member).await?;
    if updated > 0 {
        state
            .dispatcher
            .dispatch(
                thread.id,
                &ServerFrame::SeenChanged {
                    thread_id: thread.id,
                    seen_by: PartyKind::Member,
                    updated,
                },
                None,
            )
            .await;
    }
    state.unseen.invalidate(member_id).await;

    Ok(Json(MarkSeenResponse { updated }))
}

/// Records or refreshes the member's typing signal.
#[utoipa::path(
    post,
    path = "/api/threads/{thread_id}/typing",
    request_body = TypingPing,
    responses(
        (status = 200, description = "Signal recorded", body = TypingAck),
        (status = 202, description = "Signal dropped; typing is best-effort"),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Not this member's thread"),
    ),
    tag = "Dashboard"
)]
#[instrument(skip(state, context, payload))]
pub async fn typing_ping(
    Extension(state): Extension<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(thread_id): Path<Uuid>,
    Json(payload): Json<TypingPing>,
) -> AppResult<axum::response::Response> {
    let member_id = require_member(&context)?;
    let thread = owned_thread(&state, thread_id, member_id).await?;

    match state
        .presence
        .signal(thread.id, PartyKind::Member, payload.typing_id)
        .await
    {
        Some(typing_id) => {
            state
                .dispatcher
                .dispatch(
                    thread.id,
                    &ServerFrame::Typing {
                        thread_id: thread.id,
                        party: PartyKind::Member,
                        typing_id,
                    },
                    None,
                )
                .await;
            Ok(Json(TypingAck { typing_id }).into_response())
        }
        None => Ok(StatusCode::ACCEPTED.into_response()),
    }
}

/// Is the guest typing right now?
#[utoipa::path(
    get,
    path = "/api/threads/{thread_id}/typing",
    responses(
        (status = 200, description = "Freshness verdict", body = TypingStatus),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Not this member's thread"),
    ),
    tag = "Dashboard"
)]
#[instrument(skip(state, context))]
pub async fn typing_status(
    Extension(state): Extension<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(thread_id): Path<Uuid>,
) -> AppResult<Json<TypingStatus>> {
    let member_id = require_member(&context)?;
    let thread = owned_thread(&state, thread_id, member_id).await?;

    let typing = state.presence.is_typing(thread.id, PartyKind::Guest).await;
    Ok(Json(TypingStatus { typing }))
}

/// Deletes a thread and everything under it. Live connections are closed;
/// their clients observe a terminated socket, not a half-dead thread.
#[utoipa::path(
    delete,
    path = "/api/threads/{thread_id}",
    responses(
        (status = 204, description = "Thread deleted"),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Not this member's thread"),
    ),
    tag = "Dashboard"
)]
#[instrument(skip(state, context))]
pub async fn delete_thread(
    Extension(state): Extension<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(thread_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let member_id = require_member(&context)?;

    state.store.delete_thread(thread_id, member_id).await?;
    state.registry.close_thread(thread_id).await;
    state.unseen.invalidate(member_id).await;

    Ok(StatusCode::NO_CONTENT)
}

/// The member's unseen badge, cached behind the aggregator.
#[utoipa::path(
    get,
    path = "/api/unseen",
    responses(
        (status = 200, description = "Unseen counts", body = UnseenSummary),
        (status = 401, description = "Not authenticated"),
    ),
    tag = "Dashboard"
)]
#[instrument(skip(state, context))]
pub async fn unseen(
    Extension(state): Extension<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
) -> AppResult<Json<UnseenSummary>> {
    let member_id = require_member(&context)?;
    let summary = state.unseen.summary(member_id).await?;
    Ok(Json(summary))
}
