//! Request gate: credential check, per-key sliding window, global concurrency budget.

mod concurrency;
mod rate_limit;

use std::collections::HashSet;
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tokio::sync::OwnedSemaphorePermit;
use tracing::warn;

pub use concurrency::ConcurrencyGate;
pub use rate_limit::SlidingWindowLimiter;

use crate::config::AdmissionConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("Invalid API key")]
    InvalidCredential,
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Service temporarily overloaded")]
    Overloaded,
}

impl AdmissionError {
    pub fn status(&self) -> StatusCode {
        match self {
            AdmissionError::InvalidCredential => StatusCode::UNAUTHORIZED,
            AdmissionError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AdmissionError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

/// Proof that a request passed admission. Holding it keeps one concurrency slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    _slot: OwnedSemaphorePermit,
}

/// Applies auth, then rate limit, then concurrency; the first failure wins.
#[derive(Debug)]
pub struct AdmissionController {
    api_keys: HashSet<String>,
    limiter: SlidingWindowLimiter,
    gate: ConcurrencyGate,
}

impl AdmissionController {
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            api_keys: config.api_keys.clone(),
            limiter: SlidingWindowLimiter::per_minute(config.rate_limit_per_minute),
            gate: ConcurrencyGate::new(config.max_concurrent_requests),
        }
    }

    pub fn admit(&self, credential: Option<&str>) -> Result<AdmissionPermit, AdmissionError> {
        self.admit_at(credential, Instant::now())
    }

    pub fn admit_at(
        &self,
        credential: Option<&str>,
        now: Instant,
    ) -> Result<AdmissionPermit, AdmissionError> {
        let key = match credential {
            Some(key) if self.api_keys.contains(key) => key,
            _ => {
                warn!("rejected request with invalid API key");
                return Err(AdmissionError::InvalidCredential);
            }
        };

        if !self.limiter.try_acquire_at(key, now) {
            warn!(limit = self.limiter.limit(), "rate limit exceeded for API key");
            return Err(AdmissionError::RateLimited);
        }

        match self.gate.try_acquire() {
            Some(slot) => Ok(AdmissionPermit { _slot: slot }),
            None => {
                warn!(
                    capacity = self.gate.capacity(),
                    "rejected request, concurrency budget exhausted"
                );
                Err(AdmissionError::Overloaded)
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.gate.in_flight()
    }
}
