use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::chunker::Chunk;
use super::domain::{ErrorCategory, ScoringSettings};
use super::prompt::PromptRenderer;
use super::upstream::{ScoringModel, UpstreamError};
use super::validation::{parse_scored_batch, ScoredItem, ValidationError};
use crate::config::UpstreamConfig;

/// Bounded retry schedule for transient upstream failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base: Duration::from_millis(1500),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: config.retry_backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after the 0-based `attempt` failed. Rate limits back off exponentially
    /// with jitter, timeouts linearly.
    pub fn delay_after(&self, attempt: u32, error: &UpstreamError) -> Duration {
        match error {
            UpstreamError::RateLimited(_) => {
                let exponential = self
                    .backoff_base
                    .saturating_mul(2u32.saturating_pow(attempt));
                let jitter = self
                    .backoff_base
                    .mul_f64(rand::thread_rng().gen_range(0.0..1.0));
                exponential.saturating_add(jitter)
            }
            _ => self.backoff_base.saturating_mul(attempt.saturating_add(1)),
        }
    }
}

/// Why a chunk produced no usable scores.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvocationError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    InvalidPayload(#[from] ValidationError),
    #[error("model returned {actual} results for a chunk of {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

impl InvocationError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            InvocationError::Upstream(UpstreamError::RateLimited(_)) => ErrorCategory::ApiRatelimit,
            InvocationError::Upstream(UpstreamError::Timeout) => ErrorCategory::ApiTimeout,
            InvocationError::Upstream(_) => ErrorCategory::ApiFailure,
            InvocationError::InvalidPayload(err) => err.category(),
            InvocationError::LengthMismatch { .. } => ErrorCategory::InvalidJson,
        }
    }

    /// Caller-facing explanation written into each affected result.
    pub fn justification(&self) -> &'static str {
        match self {
            InvocationError::Upstream(UpstreamError::RateLimited(_)) => "Rate limited by provider",
            InvocationError::Upstream(UpstreamError::Timeout) => "Model request timed out",
            InvocationError::Upstream(_) => "Model API failure",
            InvocationError::InvalidPayload(_) => "Invalid JSON from model (batch)",
            InvocationError::LengthMismatch { .. } => "Malformed batch response length",
        }
    }
}

/// Final outcome of one chunk plus the attempts it consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub attempts: u32,
    pub outcome: Result<Vec<ScoredItem>, InvocationError>,
}

impl Invocation {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Sends chunks to the scoring model and validates what comes back.
pub struct ModelInvoker<M> {
    model: Arc<M>,
    prompt: Arc<dyn PromptRenderer>,
    retry: RetryPolicy,
}

impl<M> ModelInvoker<M>
where
    M: ScoringModel + 'static,
{
    pub fn new(model: Arc<M>, prompt: Arc<dyn PromptRenderer>, retry: RetryPolicy) -> Self {
        Self {
            model,
            prompt,
            retry,
        }
    }

    pub fn model(&self) -> &Arc<M> {
        &self.model
    }

    pub async fn invoke(&self, chunk: &Chunk, settings: &ScoringSettings) -> Invocation {
        let prompt = self.prompt.render(settings, &chunk.records());
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.model.complete(&prompt).await {
                Ok(content) => {
                    return Invocation {
                        attempts: attempt,
                        outcome: validate_batch(&content, chunk.len()),
                    };
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay_after(attempt - 1, &err);
                    debug!(
                        chunk = chunk.number,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying scoring model call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Invocation {
                        attempts: attempt,
                        outcome: Err(err.into()),
                    };
                }
            }
        }
    }
}

fn validate_batch(content: &str, expected: usize) -> Result<Vec<ScoredItem>, InvocationError> {
    let items = parse_scored_batch(content)?;
    if items.len() != expected {
        return Err(InvocationError::LengthMismatch {
            expected,
            actual: items.len(),
        });
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::chunker::ChunkEntry;
    use crate::scoring::domain::{Identity, ProspectRecord};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, UpstreamError>>>,
        calls: AtomicU32,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<String, UpstreamError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ScoringModel for ScriptedModel {
        async fn complete(&self, _prompt: &str) -> Result<String, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .expect("script mutex poisoned")
                .pop_front()
                .unwrap_or_else(|| Err(UpstreamError::Transport("script exhausted".to_string())))
        }

        async fn ping(&self) -> Result<(), UpstreamError> {
            Ok(())
        }
    }

    struct EmptyPrompt;

    impl PromptRenderer for EmptyPrompt {
        fn render(&self, _settings: &ScoringSettings, _records: &[&ProspectRecord]) -> String {
            String::new()
        }
    }

    fn instant_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            backoff_base: Duration::ZERO,
        }
    }

    fn invoker(model: Arc<ScriptedModel>) -> ModelInvoker<ScriptedModel> {
        ModelInvoker::new(model, Arc::new(EmptyPrompt), instant_retry())
    }

    fn chunk(size: usize) -> Chunk {
        Chunk {
            number: 1,
            entries: (1..=size)
                .map(|position| ChunkEntry {
                    position,
                    identity: Identity::auto(position),
                    record: ProspectRecord::new(),
                })
                .collect(),
        }
    }

    fn scored_array(size: usize) -> String {
        let items: Vec<String> = (0..size)
            .map(|i| format!(r#"{{"score": {}, "justification": "item {i}"}}"#, 50 + i))
            .collect();
        format!("[{}]", items.join(","))
    }

    #[tokio::test]
    async fn returns_validated_items_on_first_success() {
        let model = ScriptedModel::new(vec![Ok(scored_array(2))]);
        let invocation = invoker(model.clone())
            .invoke(&chunk(2), &ScoringSettings::new())
            .await;

        assert_eq!(invocation.attempts, 1);
        assert_eq!(invocation.retries(), 0);
        let items = invocation.outcome.expect("chunk scored");
        assert_eq!(items[1].score, 51);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn retries_timeouts_until_success() {
        let model = ScriptedModel::new(vec![Err(UpstreamError::Timeout), Ok(scored_array(1))]);
        let invocation = invoker(model.clone())
            .invoke(&chunk(1), &ScoringSettings::new())
            .await;

        assert_eq!(invocation.attempts, 2);
        assert_eq!(invocation.retries(), 1);
        assert!(invocation.outcome.is_ok());
    }

    #[tokio::test]
    async fn exhausted_rate_limits_report_every_attempt() {
        let limited = || Err(UpstreamError::RateLimited("slow down".to_string()));
        let model = ScriptedModel::new(vec![limited(), limited(), limited(), limited()]);
        let invocation = invoker(model.clone())
            .invoke(&chunk(3), &ScoringSettings::new())
            .await;

        assert_eq!(invocation.attempts, 3);
        assert_eq!(model.calls(), 3);
        let err = invocation.outcome.expect_err("rate limit surfaces");
        assert_eq!(err.category(), ErrorCategory::ApiRatelimit);
    }

    #[tokio::test]
    async fn non_transient_failures_are_not_retried() {
        let model = ScriptedModel::new(vec![
            Err(UpstreamError::Status {
                status: 500,
                body: "boom".to_string(),
            }),
            Ok(scored_array(1)),
        ]);
        let invocation = invoker(model.clone())
            .invoke(&chunk(1), &ScoringSettings::new())
            .await;

        assert_eq!(invocation.attempts, 1);
        assert_eq!(
            invocation.outcome.expect_err("api failure").category(),
            ErrorCategory::ApiFailure
        );
    }

    #[tokio::test]
    async fn invalid_payloads_fail_without_retry() {
        let model = ScriptedModel::new(vec![
            Ok(r#"[{"score": 101, "justification": "x"}]"#.to_string()),
            Ok(scored_array(1)),
        ]);
        let invocation = invoker(model.clone())
            .invoke(&chunk(1), &ScoringSettings::new())
            .await;

        assert_eq!(model.calls(), 1);
        let err = invocation.outcome.expect_err("out of range rejected");
        assert_eq!(err.category(), ErrorCategory::InvalidJson);
        assert_eq!(err.justification(), "Invalid JSON from model (batch)");
    }

    #[tokio::test]
    async fn length_mismatch_rejects_whole_chunk() {
        let model = ScriptedModel::new(vec![Ok(scored_array(19))]);
        let invocation = invoker(model).invoke(&chunk(20), &ScoringSettings::new()).await;

        assert_eq!(
            invocation.outcome,
            Err(InvocationError::LengthMismatch {
                expected: 20,
                actual: 19
            })
        );
    }

    #[test]
    fn backoff_grows_linearly_for_timeouts() {
        let policy = RetryPolicy {
            max_retries: 2,
            backoff_base: Duration::from_millis(100),
        };
        assert_eq!(
            policy.delay_after(0, &UpstreamError::Timeout),
            Duration::from_millis(100)
        );
        assert_eq!(
            policy.delay_after(1, &UpstreamError::Timeout),
            Duration::from_millis(200)
        );
        let limited = policy.delay_after(2, &UpstreamError::RateLimited(String::new()));
        assert!(limited >= Duration::from_millis(400));
        assert!(limited < Duration::from_millis(500));
    }
}
