//! Thin HTTP boundary: enough surface to drive [`Orchestrator::execute`]
//! over a socket, health-check it, and scrape its metrics. No auth,
//! multi-tenant config, or CLI surface of its own — that belongs to
//! whatever deploys this crate, not to the crate itself.

use crate::error::BoundaryError;
use crate::orchestrator::Orchestrator;
use crate::types::ProviderRequest;
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Shared application state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub model: String,
    pub request: ProviderRequest,
    #[serde(default)]
    pub mode: Option<crate::engine::ExecutionMode>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub success: bool,
    pub provider: Option<String>,
    pub latency_ms: u64,
    pub response: Option<crate::types::ProviderResponse>,
    pub error: Option<String>,
}

impl From<crate::engine::ExecutionResult> for ExecuteResponse {
    fn from(result: crate::engine::ExecutionResult) -> Self {
        Self {
            success: result.success,
            provider: result.provider,
            latency_ms: result.latency_ms,
            response: result.response,
            error: result.error,
        }
    }
}

async fn execute(
    State(state): State<AppState>,
    Json(body): Json<ExecuteRequest>,
) -> std::result::Result<Json<ExecuteResponse>, BoundaryError> {
    if body.model.is_empty() {
        return Err(BoundaryError::BadRequest("model must not be empty".into()));
    }
    let result = match body.mode {
        Some(mode) => state.orchestrator.execute_with_mode(&body.model, body.request, mode).await,
        None => state.orchestrator.execute(&body.model, body.request).await,
    };
    Ok(Json(result.into()))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::gather() {
        Ok(bytes) => (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            bytes,
        )
            .into_response(),
        Err(err) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// Builds the router. Exposed separately from `serve` so tests can drive it
/// in-process with `tower::ServiceExt::oneshot` without binding a socket.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = AppState { orchestrator };
    Router::new()
        .route("/v1/execute", post(execute))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .layer(CompressionLayer::new())
                .layer(tower::timeout::TimeoutLayer::new(Duration::from_secs(30)))
                .layer(TraceLayer::new_for_http()),
        )
        .with_state(state)
}

/// Binds `addr` and serves `router(orchestrator)` until `shutdown` fires.
pub async fn serve(
    orchestrator: Arc<Orchestrator>,
    addr: std::net::SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> crate::error::Result<()> {
    let app = router(orchestrator);
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(crate::error::Error::DiskIo)?;
    info!("boundary listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| crate::error::Error::Internal(format!("server error: {e}")))?;
    info!("boundary stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::OrchestratorConfig;
    use crate::provider::test_support::ScriptedProvider;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration as StdDuration;
    use tower::ServiceExt;

    fn test_config() -> OrchestratorConfig {
        OrchestratorConfig {
            cache: crate::cache::CacheConfig { enable_disk_cache: false, ..Default::default() },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let orchestrator = Arc::new(Orchestrator::new(test_config()).unwrap());
        let app = router(orchestrator);
        let response =
            app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn execute_endpoint_round_trips_through_orchestrator() {
        let orchestrator = Arc::new(Orchestrator::new(test_config()).unwrap());
        orchestrator.register_provider(ScriptedProvider::new("p1", "m", StdDuration::from_millis(5), true));
        let app = router(orchestrator);

        let body = serde_json::json!({
            "model": "m",
            "request": {
                "kind": "chat",
                "model": "m",
                "messages": [{ "role": "user", "content": "hi" }],
            }
        });
        let request = Request::builder()
            .method("POST")
            .uri("/v1/execute")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn execute_endpoint_rejects_empty_model() {
        let orchestrator = Arc::new(Orchestrator::new(test_config()).unwrap());
        let app = router(orchestrator);

        let body = serde_json::json!({
            "model": "",
            "request": { "kind": "text", "model": "", "prompt": "hi" }
        });
        let request = Request::builder()
            .method("POST")
            .uri("/v1/execute")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
