//! HTTP API server: the guest-facing proxy and webhook endpoints,
//! plus the daemon's own ping/info endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::proxy::{CommandRequest, Proxy, ReadOutcome, ReadRequest};
use crate::push::Publisher;
use crate::webhook::{self, Notification, SECRET_HEADER};

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
}

/// Shared application state
pub struct AppState {
    proxy: Proxy,
    publisher: Arc<dyn Publisher>,
    webhook_secret: String,
    version: &'static str,
}

impl AppState {
    pub fn new(proxy: Proxy, publisher: Arc<dyn Publisher>, webhook_secret: String) -> Self {
        Self {
            proxy,
            publisher,
            webhook_secret,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
        }),
    )
}

/// Handler for GET /api/ha-proxy
///
/// Single-entity and forecast reads get a longer cache hint than
/// batch reads, which back the live dashboard.
#[tracing::instrument(skip(state, query))]
async fn ha_proxy_read(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReadRequest>,
) -> Response {
    match state.proxy.read(&query).await {
        Ok(ReadOutcome::Single(entity)) => cached(30, Json(entity)),
        Ok(ReadOutcome::Forecast(forecast)) => cached(30, Json(forecast)),
        Ok(ReadOutcome::Batch(states)) => cached(10, Json(states)),
        Err(err) => err.into_response(),
    }
}

fn cached(s_maxage: u32, body: impl IntoResponse) -> Response {
    (
        [(
            header::CACHE_CONTROL,
            format!("s-maxage={s_maxage}, stale-while-revalidate"),
        )],
        body,
    )
        .into_response()
}

/// Handler for POST /api/ha-proxy
#[tracing::instrument(skip(state, body))]
async fn ha_proxy_command(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CommandRequest>,
) -> Response {
    match state.proxy.command(&body).await {
        Ok(envelope) => (StatusCode::OK, Json(envelope)).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Handler for POST /api/ha-webhook
///
/// The shared secret is checked on the raw request, before the body
/// is parsed, so an unauthenticated probe is a 401 no matter what it
/// carries.
#[tracing::instrument(skip(state, headers, body))]
async fn ha_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let secret_ok = headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == state.webhook_secret);

    if !secret_ok {
        tracing::warn!("security: webhook request with missing or wrong secret");
        return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    let notification: Notification = match serde_json::from_slice(&body) {
        Ok(notification) => notification,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Bad Request: Invalid JSON body."),
    };

    let update = match notification.into_update() {
        Ok(update) => update,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    match webhook::relay(state.publisher.as_ref(), &update).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "message": "Update pushed successfully." })),
        )
            .into_response(),
        Err(err) => {
            tracing::error!("failed to push update for {}: {err}", update.entity_id);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "A server error occurred while pushing the update.",
            )
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Create the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/api/ha-proxy", get(ha_proxy_read).post(ha_proxy_command))
        .route("/api/ha-webhook", post(ha_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to the specified address and serves until the provided
/// shutdown signal is triggered.
pub async fn serve(
    listen: String,
    port: u16,
    state: Arc<AppState>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
