use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Criteria fields (ICP rules, seller description, exclusions). Only ever serialized into
/// the outbound prompt.
pub type ScoringSettings = Map<String, Value>;

/// One free-shape prospect object as received from the caller.
pub type ProspectRecord = Map<String, Value>;

/// Inbound body shared by both scoring endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoringRequest {
    pub scoring_settings: ScoringSettings,
    /// Items are kept as raw values so non-object entries can be reported per position.
    pub prospects: Vec<Value>,
}

/// Stable key attributing a result back to its input record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub String);

impl Identity {
    /// Synthesized identity for a 1-indexed position.
    pub fn auto(position: usize) -> Self {
        Identity(format!("auto-{position}"))
    }

    /// Resolves `prospect_id`, then `id`, then `auto-<position>`.
    ///
    /// Null, empty strings, booleans and nested values do not count as an identity.
    pub fn resolve(record: &ProspectRecord, position: usize) -> Self {
        ["prospect_id", "id"]
            .iter()
            .find_map(|field| record.get(*field).and_then(identity_from_value))
            .unwrap_or_else(|| Identity::auto(position))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn identity_from_value(value: &Value) -> Option<Identity> {
    match value {
        Value::String(raw) if !raw.is_empty() => Some(Identity(raw.clone())),
        Value::Number(number) if number.as_f64() != Some(0.0) => {
            Some(Identity(number.to_string()))
        }
        _ => None,
    }
}

/// Final per-position answer returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringResult {
    pub prospect_id: Identity,
    pub score: u8,
    pub justification: String,
}

impl ScoringResult {
    pub fn failed(prospect_id: Identity, category: ErrorCategory, reason: &str) -> Self {
        Self {
            prospect_id,
            score: 0,
            justification: format!("{reason} ({category})"),
        }
    }
}

/// Exhaustive failure taxonomy, reported per position and in `X-Error-Counts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    InvalidProspectPayload,
    ApiRatelimit,
    ApiTimeout,
    InvalidJson,
    ApiFailure,
    NotProcessed,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::InvalidProspectPayload => "invalid_prospect_payload",
            ErrorCategory::ApiRatelimit => "api_ratelimit",
            ErrorCategory::ApiTimeout => "api_timeout",
            ErrorCategory::InvalidJson => "invalid_json",
            ErrorCategory::ApiFailure => "api_failure",
            ErrorCategory::NotProcessed => "not_processed",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate telemetry for one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetadata {
    pub request_id: String,
    pub count: usize,
    pub ok: usize,
    pub ok_share: f64,
    pub error_counts: BTreeMap<ErrorCategory, usize>,
    pub retries_total: u32,
    pub latency_seconds: f64,
}

impl RunMetadata {
    /// JSON object keyed by category tag, e.g. `{"api_timeout":20}`.
    pub fn error_counts_json(&self) -> String {
        let tagged: BTreeMap<&'static str, usize> = self
            .error_counts
            .iter()
            .map(|(category, count)| (category.as_str(), *count))
            .collect();
        serde_json::to_string(&tagged).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Ordered results plus the run metadata.
#[derive(Debug, Clone)]
pub struct ScoringRun {
    pub results: Vec<ScoringResult>,
    pub metadata: RunMetadata,
}
