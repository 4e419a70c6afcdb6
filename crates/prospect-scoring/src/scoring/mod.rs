//! Batch scoring pipeline: chunking, model invocation, validation, aggregation.

pub mod chunker;
pub mod domain;
pub mod invoker;
pub mod orchestrator;
pub mod prompt;
pub mod router;
pub mod service;
pub mod upstream;
pub mod validation;

pub use domain::{
    ErrorCategory, Identity, ProspectRecord, RunMetadata, ScoringRequest, ScoringResult,
    ScoringRun, ScoringSettings,
};
pub use invoker::{ModelInvoker, RetryPolicy};
pub use orchestrator::BatchOrchestrator;
pub use prompt::{BatchPrompt, PromptRenderer};
pub use router::scoring_router;
pub use service::ProspectScoringService;
pub use upstream::{OpenAiChatModel, ScoringModel, UpstreamError};
