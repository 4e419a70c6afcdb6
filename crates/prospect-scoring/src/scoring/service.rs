use std::sync::Arc;

use crate::admission::{AdmissionController, AdmissionError, AdmissionPermit};
use crate::config::AppConfig;

use super::domain::{ScoringRequest, ScoringRun};
use super::invoker::{ModelInvoker, RetryPolicy};
use super::orchestrator::BatchOrchestrator;
use super::prompt::{BatchPrompt, PromptRenderer};
use super::upstream::{ScoringModel, UpstreamError};

/// Service composing admission control and the batch orchestrator.
pub struct ProspectScoringService<M> {
    admission: AdmissionController,
    orchestrator: BatchOrchestrator<M>,
    version: String,
}

impl<M> ProspectScoringService<M>
where
    M: ScoringModel + 'static,
{
    pub fn new(
        admission: AdmissionController,
        orchestrator: BatchOrchestrator<M>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            admission,
            orchestrator,
            version: version.into(),
        }
    }

    /// Wires the service from configuration with the default batch prompt.
    pub fn from_config(model: Arc<M>, config: &AppConfig) -> Self {
        Self::with_prompt(model, Arc::new(BatchPrompt), config)
    }

    pub fn with_prompt(
        model: Arc<M>,
        prompt: Arc<dyn PromptRenderer>,
        config: &AppConfig,
    ) -> Self {
        let invoker = ModelInvoker::new(model, prompt, RetryPolicy::from_config(&config.upstream));
        let orchestrator = BatchOrchestrator::new(Arc::new(invoker))
            .with_chunk_size(config.scoring.chunk_size)
            .with_chunk_workers(config.scoring.chunk_workers);

        Self::new(
            AdmissionController::new(&config.admission),
            orchestrator,
            config.scoring.scorer_version.clone(),
        )
    }

    /// Auth, then rate limit, then concurrency. The permit holds a concurrency slot
    /// until dropped.
    pub fn admit(&self, credential: Option<&str>) -> Result<AdmissionPermit, AdmissionError> {
        self.admission.admit(credential)
    }

    /// Scores every prospect while the caller holds `permit`.
    pub async fn run(&self, permit: AdmissionPermit, request: ScoringRequest) -> ScoringRun {
        let run = self.orchestrator.run(request).await;
        drop(permit);
        run
    }

    /// Admits the caller and scores every prospect.
    pub async fn score(
        &self,
        credential: Option<&str>,
        request: ScoringRequest,
    ) -> Result<ScoringRun, AdmissionError> {
        let permit = self.admit(credential)?;
        Ok(self.run(permit, request).await)
    }

    /// Confirms the scoring model answers.
    pub async fn ready(&self) -> Result<(), UpstreamError> {
        self.orchestrator.invoker().model().ping().await
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}
