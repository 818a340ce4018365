use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
    time::Duration,
};

use axum::{Extension, Router, response::IntoResponse, routing::get, serve};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt};

use shared::config::{Config, server::LogFormat};

use crate::{
    app_state::AppState,
    db::bootstrap,
    handlers,
    middleware::{
        auth,
        request_context::{self, RequestIdState},
    },
    openapi, routes,
    services::{
        identity::{IdentityProvider, PgSessionIdentity, StaticIdentity},
        thread_store::{ThreadStore, memory::MemoryThreadStore, pg::PgThreadStore},
    },
};
use axum::http::{HeaderValue, StatusCode, header};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the tracing subscriber for logging using the provided configuration.
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).init();
    } else {
        fmt_builder.with_ansi(true).init();
    }

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Creates the CORS layer. Widgets are embedded on arbitrary sites, so the
/// default is any origin; deployments pin origins through configuration.
pub fn create_cors_layer(config: &Config) -> CorsLayer {
    use http::Method;

    let methods = vec![
        Method::GET,
        Method::POST,
        Method::DELETE,
        Method::OPTIONS,
    ];

    let mut cors = CorsLayer::new()
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(AllowHeaders::any())
        .allow_credentials(config.server.cors.allow_credentials)
        .max_age(Duration::from_secs(config.server.cors.max_age_seconds));

    if config.server.cors.allowed_origins.is_empty() {
        cors = cors.allow_origin(AllowOrigin::any());
    } else {
        let origins = config
            .server
            .cors
            .allowed_origins
            .iter()
            .filter_map(|origin| http::HeaderValue::from_str(origin).ok())
            .collect::<Vec<_>>();
        cors = cors.allow_origin(AllowOrigin::list(origins));
    }

    cors
}

/// Assembles the `/api` router: widget surface, dashboard surface behind
/// auth, the socket gateway, and the OpenAPI document.
pub fn create_api_router(state: &Arc<AppState>) -> Router {
    let member_routes = handlers::threads::routes().route_layer(
        axum::middleware::from_fn_with_state(Arc::clone(state), auth::require_member),
    );

    Router::new()
        .merge(handlers::widget::routes())
        .merge(member_routes)
        .route("/socket", get(handlers::socket::socket_handler))
        .merge(openapi::routes())
}

/// Creates the main application router with all middleware and routes.
pub fn create_app_router(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let cors = create_cors_layer(&state.config);
    let request_id_state = RequestIdState::from_config(&state.config);

    Router::new()
        .nest("/api", create_api_router(&state))
        .merge(routes::health::routes())
        .route("/metrics", get(metrics_endpoint))
        .layer(Extension(metrics_handle))
        .layer(Extension(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn_with_state(
            request_id_state,
            request_context::assign_request_id,
        ))
}

/// Creates the graceful shutdown signal handler.
pub async fn create_shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutting down...");
}

/// Starts the server: picks the store backend from configuration, runs the
/// database bootstrap when one is configured, wires the engine, and serves
/// until shutdown.
///
/// # Errors
/// Returns an error if the database is unreachable or the listener cannot
/// bind.
pub async fn run(config: Config) -> anyhow::Result<()> {
    initialize_tracing(&config);
    info!("Starting server...");

    let metrics_handle = metrics_handle();
    let config = Arc::new(config);

    let (pool, store, identity): (
        Option<sqlx::PgPool>,
        Arc<dyn ThreadStore>,
        Arc<dyn IdentityProvider>,
    ) = if config.db.url.is_empty() {
        warn!("no database url configured; running on the in-process memory store");
        (
            None,
            Arc::new(MemoryThreadStore::new()),
            Arc::new(StaticIdentity::new()),
        )
    } else {
        let pool = PgPoolOptions::new()
            .max_connections(config.db.max_connections)
            .connect(&config.db.url)
            .await?;

        bootstrap::ensure_liveness(&pool).await?;
        bootstrap::run(&pool).await?;
        bootstrap::ensure_readiness(&pool).await?;

        (
            Some(pool.clone()),
            Arc::new(PgThreadStore::new(pool.clone())),
            Arc::new(PgSessionIdentity::new(pool)),
        )
    };

    let state = AppState::build(Arc::clone(&config), pool, store, identity);
    state
        .presence
        .spawn_reclamation(Duration::from_secs(config.chat.typing_prune_interval_secs));

    let app = create_app_router(Arc::clone(&state), metrics_handle);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal())
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TEST_TOKEN, harness};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_payload() {
        let fx = harness().await;
        let app = create_app_router(fx.state, metrics_handle());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
        assert_eq!(content_type, "text/plain; version=0.0.4");
    }

    #[tokio::test]
    async fn dashboard_routes_reject_missing_credentials() {
        let fx = harness().await;
        let app = create_app_router(fx.state, metrics_handle());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/threads")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn widget_open_then_dashboard_poll_sees_the_thread() {
        let fx = harness().await;
        let app = create_app_router(Arc::clone(&fx.state), metrics_handle());

        // Guest opens a thread with a first message.
        let open = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/widget/threads")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({
                            "website_id": fx.website_id,
                            "guest": { "name": "Ada" },
                            "body": "hello there"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(open.status(), StatusCode::CREATED);
        let opened = body_json(open).await;
        let secret = opened["thread_secret"].as_str().unwrap().to_string();
        assert_eq!(opened["message"]["body"], "hello there");
        assert_eq!(opened["message"]["seen"], false);

        // Reusing the secret reattaches instead of opening a second thread.
        let reopen = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/widget/threads")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({
                            "website_id": fx.website_id,
                            "thread_secret": secret,
                            "body": "back again"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(reopen.status(), StatusCode::CREATED);
        let reopened = body_json(reopen).await;
        assert_eq!(reopened["thread_id"], opened["thread_id"]);

        // The dashboard poll fallback sees one thread with unseen messages.
        let list = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/threads")
                    .header(header::AUTHORIZATION, format!("Bearer {TEST_TOKEN}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(list.status(), StatusCode::OK);
        let listed = body_json(list).await;
        assert_eq!(listed["threads"].as_array().unwrap().len(), 1);
        assert_eq!(listed["threads"][0]["last_message"], "back again");

        let unseen = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/unseen")
                    .header(header::AUTHORIZATION, format!("Bearer {TEST_TOKEN}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let badge = body_json(unseen).await;
        assert_eq!(badge["total"], 2);

        // Unknown secrets never reattach, they are refused outright.
        let forged = app
            .oneshot(
                Request::builder()
                    .uri("/api/widget/threads/forged-secret/messages")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn member_mark_seen_round_trip_over_rest() {
        let fx = harness().await;
        let app = create_app_router(Arc::clone(&fx.state), metrics_handle());
        let thread = fx.open_thread().await;
        fx.store
            .append_message(thread.id, shared::models::PartyKind::Guest, "hi", &[])
            .await
            .unwrap();

        let seen = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/threads/{}/seen", thread.id))
                    .header(header::AUTHORIZATION, format!("Bearer {TEST_TOKEN}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(seen.status(), StatusCode::OK);
        assert_eq!(body_json(seen).await["updated"], 1);

        let again = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/threads/{}/seen", thread.id))
                    .header(header::AUTHORIZATION, format!("Bearer {TEST_TOKEN}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(again).await["updated"], 0);
    }
}
