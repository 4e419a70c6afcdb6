//! Ordered, complete scoring of one request.
//!
//! Results are written into a slot per input position, so chunk completion order never
//! affects output order. Chunk failures become score-0 results for the chunk's
//! positions; nothing below admission aborts the run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::chunker::{chunk_entries, Chunk, ChunkEntry, CHUNK_SIZE};
use super::domain::{
    ErrorCategory, Identity, ProspectRecord, RunMetadata, ScoringRequest, ScoringResult,
    ScoringRun,
};
use super::invoker::{Invocation, InvocationError, ModelInvoker};
use super::upstream::ScoringModel;

const DEFAULT_CHUNK_WORKERS: usize = 4;

pub struct BatchOrchestrator<M> {
    invoker: Arc<ModelInvoker<M>>,
    chunk_size: usize,
    chunk_workers: usize,
}

impl<M> BatchOrchestrator<M>
where
    M: ScoringModel + 'static,
{
    pub fn new(invoker: Arc<ModelInvoker<M>>) -> Self {
        Self {
            invoker,
            chunk_size: CHUNK_SIZE,
            chunk_workers: DEFAULT_CHUNK_WORKERS,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_chunk_workers(mut self, chunk_workers: usize) -> Self {
        self.chunk_workers = chunk_workers.max(1);
        self
    }

    pub fn invoker(&self) -> &Arc<ModelInvoker<M>> {
        &self.invoker
    }

    pub async fn run(&self, request: ScoringRequest) -> ScoringRun {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let ScoringRequest {
            scoring_settings,
            prospects,
        } = request;

        let count = prospects.len();
        let mut tally = RunTally::new(count);

        let mut admitted = Vec::with_capacity(count);
        for (index, item) in prospects.into_iter().enumerate() {
            let position = index + 1;
            match item {
                Value::Object(record) => admitted.push(normalize(record, position)),
                _ => tally.fail(
                    position,
                    Identity::auto(position),
                    ErrorCategory::InvalidProspectPayload,
                    "Invalid prospect payload (not an object)",
                ),
            }
        }

        let chunks = chunk_entries(admitted, self.chunk_size);
        let invoker = &self.invoker;
        let settings = &scoring_settings;

        let mut outcomes = stream::iter(chunks)
            .map(move |chunk| async move {
                let invocation = invoker.invoke(&chunk, settings).await;
                (chunk, invocation)
            })
            .buffer_unordered(self.chunk_workers);

        while let Some((chunk, invocation)) = outcomes.next().await {
            tally.record_chunk(&request_id, chunk, invocation);
        }

        let (results, metadata) = tally.finish(request_id, started);
        info!(
            request_id = %metadata.request_id,
            count = metadata.count,
            ok = metadata.ok,
            ok_share = metadata.ok_share,
            retries_total = metadata.retries_total,
            latency_s = metadata.latency_seconds,
            error_counts = %metadata.error_counts_json(),
            "score_prospects"
        );

        ScoringRun { results, metadata }
    }
}

/// Assigns the identity once and makes sure the record sent upstream carries it.
fn normalize(mut record: ProspectRecord, position: usize) -> ChunkEntry {
    let identity = Identity::resolve(&record, position);
    record
        .entry("prospect_id")
        .or_insert_with(|| Value::String(identity.0.clone()));

    ChunkEntry {
        position,
        identity,
        record,
    }
}

/// Request-local result slots and counters.
struct RunTally {
    slots: Vec<Option<ScoringResult>>,
    ok: usize,
    error_counts: BTreeMap<ErrorCategory, usize>,
    retries_total: u32,
}

impl RunTally {
    fn new(count: usize) -> Self {
        Self {
            slots: vec![None; count],
            ok: 0,
            error_counts: BTreeMap::new(),
            retries_total: 0,
        }
    }

    fn slot(&mut self, position: usize) -> Option<&mut Option<ScoringResult>> {
        position
            .checked_sub(1)
            .and_then(|index| self.slots.get_mut(index))
    }

    fn fail(&mut self, position: usize, identity: Identity, category: ErrorCategory, reason: &str) {
        if let Some(slot) = self.slot(position) {
            *slot = Some(ScoringResult::failed(identity, category, reason));
            *self.error_counts.entry(category).or_insert(0) += 1;
        }
    }

    fn record_chunk(&mut self, request_id: &str, chunk: Chunk, invocation: Invocation) {
        self.retries_total = self.retries_total.saturating_add(invocation.retries());
        let attempts = invocation.attempts;

        match invocation.outcome {
            Ok(items) => {
                for (entry, item) in chunk.entries.into_iter().zip(items) {
                    if let Some(echoed) = item.prospect_id.as_deref() {
                        if !echoed.is_empty() && echoed != entry.identity.as_str() {
                            warn!(
                                request_id,
                                position = entry.position,
                                expected = %entry.identity,
                                echoed,
                                "model echoed a different prospect_id"
                            );
                        }
                    }

                    if let Some(slot) = self.slot(entry.position) {
                        *slot = Some(ScoringResult {
                            prospect_id: entry.identity,
                            score: item.score,
                            justification: item.justification,
                        });
                        self.ok += 1;
                    }
                }
            }
            Err(err) => {
                log_chunk_failure(request_id, &chunk, attempts, &err);
                let category = err.category();
                for entry in chunk.entries {
                    self.fail(entry.position, entry.identity, category, err.justification());
                }
            }
        }
    }

    fn finish(mut self, request_id: String, started: Instant) -> (Vec<ScoringResult>, RunMetadata) {
        let count = self.slots.len();
        let mut missing = 0usize;

        let results: Vec<ScoringResult> = std::mem::take(&mut self.slots)
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    missing += 1;
                    ScoringResult::failed(
                        Identity::auto(index + 1),
                        ErrorCategory::NotProcessed,
                        "Not processed",
                    )
                })
            })
            .collect();

        if missing > 0 {
            error!(request_id = %request_id, missing, "positions left without a result");
            *self
                .error_counts
                .entry(ErrorCategory::NotProcessed)
                .or_insert(0) += missing;
        }

        let ok_share = if count == 0 {
            0.0
        } else {
            self.ok as f64 / count as f64
        };

        let metadata = RunMetadata {
            request_id,
            count,
            ok: self.ok,
            ok_share,
            error_counts: self.error_counts,
            retries_total: self.retries_total,
            latency_seconds: started.elapsed().as_secs_f64(),
        };

        (results, metadata)
    }
}

fn log_chunk_failure(request_id: &str, chunk: &Chunk, attempts: u32, err: &InvocationError) {
    match err.category() {
        ErrorCategory::ApiFailure => error!(
            request_id,
            chunk = chunk.number,
            size = chunk.len(),
            attempts,
            error = %err,
            "scoring model call failed"
        ),
        category => warn!(
            request_id,
            chunk = chunk.number,
            size = chunk.len(),
            attempts,
            category = %category,
            error = %err,
            "chunk could not be scored"
        ),
    }
}
