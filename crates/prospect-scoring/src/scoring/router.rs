use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};

use crate::error::AppError;

use super::domain::{RunMetadata, ScoringRequest};
use super::service::ProspectScoringService;
use super::upstream::ScoringModel;

pub const BATCH_SCORING_PATH: &str = "/score-prospects-batch";
/// Legacy alias served by the same handler.
pub const LEGACY_SCORING_PATH: &str = "/score_prospects";

/// Router builder exposing both scoring endpoints.
pub fn scoring_router<M>(service: Arc<ProspectScoringService<M>>) -> Router
where
    M: ScoringModel + 'static,
{
    Router::new()
        .route(BATCH_SCORING_PATH, post(score_handler::<M>))
        .route(LEGACY_SCORING_PATH, post(score_handler::<M>))
        .with_state(service)
}

/// Admission runs before the body is parsed, so credential and budget failures win over
/// malformed payloads.
pub(crate) async fn score_handler<M>(
    State(service): State<Arc<ProspectScoringService<M>>>,
    headers: HeaderMap,
    body: Result<Json<ScoringRequest>, JsonRejection>,
) -> Response
where
    M: ScoringModel + 'static,
{
    let permit = match service.admit(bearer_token(&headers)) {
        Ok(permit) => permit,
        Err(rejection) => return rejection.into_response(),
    };
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return AppError::from(rejection).into_response(),
    };

    let run = service.run(permit, request).await;
    let headers = metadata_headers(&run.metadata, service.version());
    (headers, Json(run.results)).into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|token| !token.is_empty())
}

fn metadata_headers(metadata: &RunMetadata, version: &str) -> HeaderMap {
    let entries = [
        ("x-scorer-version", version.to_string()),
        ("x-request-id", metadata.request_id.clone()),
        ("x-count", metadata.count.to_string()),
        ("x-ok", metadata.ok.to_string()),
        ("x-ok-share", format!("{:.3}", metadata.ok_share)),
        ("x-retries-total", metadata.retries_total.to_string()),
        ("x-latency-s", format!("{:.3}", metadata.latency_seconds)),
        ("x-error-counts", metadata.error_counts_json()),
    ];

    let mut headers = HeaderMap::with_capacity(entries.len());
    for (name, value) in entries {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
    headers
}
