use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uplan_core::{ClientKey, ErrorKind, FeedResponse, service::FeedService};

use crate::metrics::{Metrics, track_requests};

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FeedService>,
    pub metrics: Metrics,
    pub trust_forwarded_for: bool,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

#[derive(Deserialize)]
struct CreateFeedQuery {
    courses: String,
    semester: Option<String>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/create", get(create_feed_handler))
        .route("/ics/{path}", get(feed_handler))
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            track_requests,
        ))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "uplan",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Combined calendar feeds for university courses",
        "endpoints": {
            "health": "/health",
            "create": "/create?courses=<id>[-<group>],...&semester=<code>",
            "feed": "/ics/{path}",
            "metrics": "/metrics"
        }
    }))
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn metrics_handler(State(state): State<AppState>) -> Result<Response, AppError> {
    let body = state
        .metrics
        .render()
        .map_err(|e| uplan_core::Error::Internal(format!("Failed to encode metrics: {e}")))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

async fn create_feed_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<CreateFeedQuery>,
) -> Result<Json<FeedResponse>, AppError> {
    let client = client_key(&state, addr, &headers);
    let response = state
        .service
        .create_feed(&params.courses, params.semester.as_deref(), &client)
        .await?;
    Ok(Json(response))
}

async fn feed_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Result<Response, AppError> {
    let client = client_key(&state, addr, &headers);
    let calendar = state.service.render_feed(&path, &client).await?;

    let disposition = format!("attachment; filename={path}.ics");
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/calendar; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        calendar,
    )
        .into_response())
}

/// The socket peer, or the first `X-Forwarded-For` hop behind a trusted proxy.
fn client_key(state: &AppState, addr: SocketAddr, headers: &HeaderMap) -> ClientKey {
    if state.trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(forwarded) = forwarded {
            return ClientKey::Address(forwarded.to_string());
        }
    }
    ClientKey::Address(addr.ip().to_string())
}

/// Maps core errors onto HTTP responses by kind.
#[derive(Debug)]
struct AppError(uplan_core::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self.0.kind() {
            ErrorKind::Validation => (StatusCode::BAD_REQUEST, "invalid request", self.0.to_string()),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not found", "Feed not found".to_string()),
            ErrorKind::RateLimit => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate limited",
                "Rate limit exceeded, try again later".to_string(),
            ),
            ErrorKind::Upstream | ErrorKind::Internal => {
                tracing::error!("Request failed: {}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<uplan_core::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
