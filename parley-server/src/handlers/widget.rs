//! Guest-facing REST surface, addressed by thread secret.
//!
//! The secret is the whole guest credential: an unknown secret is
//! `unauthorized`, never `not_found`, so the widget cannot probe for thread
//! existence. These endpoints double as the polling fallback for widgets
//! without a live socket; they read the same store the live path writes.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tracing::instrument;

use shared::models::{
    MarkSeenResponse, MessagePage, OpenThreadRequest, OpenThreadResponse, PartyKind,
    PostMessageRequest, ServerFrame, Thread, TypingAck, TypingPing, TypingStatus,
};

use crate::{
    app_state::AppState,
    handlers::validate_message_body,
    http::error::{ApiError, AppResult},
    services::thread_store::{NewGuest, NewThread},
};

pub fn routes() -> Router {
    Router::new()
        .route("/widget/threads", post(open_thread))
        .route(
            "/widget/threads/{secret}/messages",
            get(list_messages).post(post_message),
        )
        .route("/widget/threads/{secret}/seen", post(mark_seen))
        .route(
            "/widget/threads/{secret}/typing",
            get(typing_status).post(typing_ping),
        )
}

#[derive(Debug, Deserialize, Default)]
struct PageQuery {
    page: Option<u32>,
}

async fn resolve_thread(state: &AppState, secret: &str) -> AppResult<Thread> {
    state
        .store
        .thread_by_secret(secret)
        .await?
        .ok_or_else(|| ApiError::unauthorized("unknown thread secret"))
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Opens a thread on first guest contact, or reattaches via a secret from a
/// previous visit, and appends the guest's message.
#[utoipa::path(
    post,
    path = "/api/widget/threads",
    request_body = OpenThreadRequest,
    responses(
        (status = 201, description = "Thread opened or reattached", body = OpenThreadResponse),
        (status = 400, description = "Invalid message body"),
        (status = 404, description = "Unknown website"),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "Widget"
)]
#[instrument(skip(state, headers, payload))]
pub async fn open_thread(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<OpenThreadRequest>,
) -> AppResult<impl IntoResponse> {
    let body = validate_message_body(&payload.body, state.config.chat.message_max_chars)?;

    let existing = match payload.thread_secret.as_deref() {
        Some(secret) => state
            .store
            .thread_by_secret(secret)
            .await?
            .filter(|thread| thread.website_id == payload.website_id),
        None => None,
    };

    let thread = match existing {
        Some(thread) => thread,
        None => {
            let member_id = state
                .store
                .website_owner(payload.website_id)
                .await?
                .ok_or_else(|| ApiError::not_found("unknown website"))?;

            state
                .store
                .create_thread(NewThread {
                    website_id: payload.website_id,
                    member_id,
                    guest: NewGuest {
                        name: payload.guest.name.clone(),
                        email: payload.guest.email.clone(),
                        ip: client_ip(&headers),
                        latitude: payload.guest.latitude,
                        longitude: payload.guest.longitude,
                    },
                })
                .await?
        }
    };

    let message = state
        .store
        .append_message(thread.id, PartyKind::Guest, &body, &payload.attachments)
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
    state.unseen.invalidate(thread.member_id).await;

    Ok((
        StatusCode::CREATED,
        Json(OpenThreadResponse {
            thread_id: thread.id,
            thread_secret: thread.secret.clone(),
            message,
        }),
    ))
}

/// Polling fallback for the widget's message log.
#[utoipa::path(
    get,
    path = "/api/widget/threads/{secret}/messages",
    params(("secret" = String, Path, description = "Thread secret"), ("page" = Option<u32>, Query, description = "1 is the newest window")),
    responses(
        (status = 200, description = "One page of messages", body = MessagePage),
        (status = 401, description = "Unknown secret"),
    ),
    tag = "Widget"
)]
#[instrument(skip(state, secret))]
pub async fn list_messages(
    Extension(state): Extension<Arc<AppState>>,
    Path(secret): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<MessagePage>> {
    let thread = resolve_thread(&state, &secret).await?;
    let page = state
        .store
        .list_messages(thread.id, query.page.unwrap_or(1), state.config.chat.page_size)
        .await?;
    Ok(Json(page))
}

/// Appends a guest message over REST.
#[utoipa::path(
    post,
    path = "/api/widget/threads/{secret}/messages",
    request_body = PostMessageRequest,
    responses(
        (status = 201, description = "Message appended", body = shared::models::Message),
        (status = 400, description = "Invalid message body"),
        (status = 401, description = "Unknown secret"),
        (status = 503, description = "Store unavailable; the client must resend"),
    ),
    tag = "Widget"
)]
#[instrument(skip(state, secret, payload))]
pub async fn post_message(
    Extension(state): Extension<Arc<AppState>>,
    Path(secret): Path<String>,
    Json(payload): Json<PostMessageRequest>,
) -> AppResult<impl IntoResponse> {
    let thread = resolve_thread(&state, &secret).await?;
    let body = validate_message_body(&payload.body, state.config.chat.message_max_chars)?;

    let message = state
        .store
        .append_message(thread.id, PartyKind::Guest, &body, &payload.attachments)
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
    state.unseen.invalidate(thread.member_id).await;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Marks member-authored messages as seen by the guest.
#[utoipa::path(
    post,
    path = "/api/widget/threads/{secret}/seen",
    responses(
        (status = 200, description = "Messages flipped", body = MarkSeenResponse),
        (status = 401, description = "Unknown secret"),
    ),
    tag = "Widget"
)]
#[instrument(skip(state, secret))]
pub async fn mark_seen(
    Extension(state): Extension<Arc<AppState>>,
    Path(secret): Path<String>,
) -> AppResult<Json<MarkSeenResponse>> {
    let thread = resolve_thread(&state, &secret).await?;
    let updated = state.store.mark_seen(thread.id, PartyKind::Guest).await?;

    if updated > 0 {
        state
            .dispatcher
            .dispatch(
                thread.id,
                &ServerFrame::SeenChanged {
                    thread_id: thread.id,
                    seen_by: PartyKind::Guest,
                    updated,
                },
                None,
            )
            .await;
    }
    state.unseen.invalidate(thread.member_id).await;

    Ok(Json(MarkSeenResponse { updated }))
}

/// Records or refreshes the guest's typing signal.
#[utoipa::path(
    post,
    path = "/api/widget/threads/{secret}/typing",
    request_body = TypingPing,
    responses(
        (status = 200, description = "Signal recorded", body = TypingAck),
        (status = 202, description = "Signal dropped; typing is best-effort"),
        (status = 401, description = "Unknown secret"),
    ),
    tag = "Widget"
)]
#[instrument(skip(state, secret, payload))]
pub async fn typing_ping(
    Extension(state): Extension<Arc<AppState>>,
    Path(secret): Path<String>,
    Json(payload): Json<TypingPing>,
) -> AppResult<axum::response::Response> {
    let thread = resolve_thread(&state, &secret).await?;

    match state
        .presence
        .signal(thread.id, PartyKind::Guest, payload.typing_id)
        .await
    {
        Some(typing_id) => {
            state
                .dispatcher
                .dispatch(
                    thread.id,
                    &ServerFrame::Typing {
                        thread_id: thread.id,
                        party: PartyKind::Guest,
                        typing_id,
                    },
                    None,
                )
                .await;
            Ok(Json(TypingAck { typing_id }).into_response())
        }
        // Already logged by the tracker; typing is lossy by contract.
        None => Ok(StatusCode::ACCEPTED.into_response()),
    }
}

/// Is the member typing right now?
#[utoipa::path(
    get,
    path = "/api/widget/threads/{secret}/typing",
    responses(
        (status = 200, description = "Freshness verdict", body = TypingStatus),
        (status = 401, description = "Unknown secret"),
    ),
    tag = "Widget"
)]
#[instrument(skip(state, secret))]
pub async fn typing_status(
    Extension(state): Extension<Arc<AppState>>,
    Path(secret): Path<String>,
) -> AppResult<Json<TypingStatus>> {
    let thread = resolve_thread(&state, &secret).await?;
    let typing = state.presence.is_typing(thread.id, PartyKind::Member).await;
    Ok(Json(TypingStatus { typing }))
}
