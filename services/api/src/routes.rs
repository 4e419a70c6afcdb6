use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use prospect_scoring::scoring::{scoring_router, ProspectScoringService, ScoringModel};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::warn;

pub(crate) fn with_scoring_routes<M>(service: Arc<ProspectScoringService<M>>) -> axum::Router
where
    M: ScoringModel + 'static,
{
    scoring_router(Arc::clone(&service))
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint::<M>))
        .route("/metrics", get(metrics_endpoint))
        .layer(Extension(service))
}

pub(crate) async fn healthcheck(Extension(state): Extension<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": state.version.as_ref(),
    }))
}

pub(crate) async fn readiness_endpoint<M>(
    Extension(state): Extension<AppState>,
    Extension(service): Extension<Arc<ProspectScoringService<M>>>,
) -> impl IntoResponse
where
    M: ScoringModel + 'static,
{
    if !state.readiness.load(Ordering::Relaxed) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "initializing" })),
        );
    }

    match service.ready().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "model": "available",
                "timestamp": Utc::now().to_rfc3339(),
            })),
        ),
        Err(err) => {
            warn!(error = %err, "readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": format!("Model not ready: {err}") })),
            )
        }
    }
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
