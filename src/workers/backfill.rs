//! One backfill pass: fetch candidates, embed each in turn, write results back.
//!
//! Failures are contained per record. A record that fails at any step keeps its
//! empty embedding and is selected again on the next pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::constants::TEXT_SEPARATOR;
use crate::services::embedding_provider::EmbeddingProvider;
use crate::store::{Record, RecordWriter, RowSource, WriteError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub candidates: usize,
    pub embedded: usize,
    pub skipped_empty: usize,
    pub provider_failures: usize,
    pub write_failures: usize,
    /// Stopped early on shutdown; the remaining candidates were left untouched.
    pub interrupted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    SourceUnavailable,
    NoCandidates,
    Processed(CycleReport),
}

/// Title and content joined by a single space, trimmed.
pub fn normalize_text(title: &str, content: &str) -> String {
    format!("{title}{TEXT_SEPARATOR}{content}").trim().to_string()
}

pub struct BackfillCycle {
    source: Arc<dyn RowSource>,
    provider: Arc<dyn EmbeddingProvider>,
    writer: Arc<dyn RecordWriter>,
}

impl BackfillCycle {
    pub fn new(
        source: Arc<dyn RowSource>,
        provider: Arc<dyn EmbeddingProvider>,
        writer: Arc<dyn RecordWriter>,
    ) -> Self {
        Self {
            source,
            provider,
            writer,
        }
    }

    pub async fn run(&self) -> CycleOutcome {
        self.run_until(&AtomicBool::new(false)).await
    }

    /// Run one pass, checking `stop` before each record. The in-flight record always finishes.
    pub async fn run_until(&self, stop: &AtomicBool) -> CycleOutcome {
        tracing::info!("Checking for records without embeddings");

        let candidates = match self.source.fetch_candidates().await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch candidate records");
                return CycleOutcome::SourceUnavailable;
            }
        };

        if candidates.is_empty() {
            tracing::info!("No records without embeddings");
            return CycleOutcome::NoCandidates;
        }

        tracing::info!(count = candidates.len(), "Processing records without embeddings");

        let mut report = CycleReport {
            candidates: candidates.len(),
            ..CycleReport::default()
        };

        for record in &candidates {
            if stop.load(Ordering::SeqCst) {
                tracing::info!(
                    remaining = report.candidates - report.attempted(),
                    "Stop requested, ending cycle early"
                );
                report.interrupted = true;
                break;
            }
            self.process_record(record, &mut report).await;
        }

        tracing::info!(
            candidates = report.candidates,
            embedded = report.embedded,
            skipped_empty = report.skipped_empty,
            provider_failures = report.provider_failures,
            write_failures = report.write_failures,
            interrupted = report.interrupted,
            "Backfill cycle complete"
        );
        CycleOutcome::Processed(report)
    }

    async fn process_record(&self, record: &Record, report: &mut CycleReport) {
        let text = normalize_text(&record.title, &record.content);
        if text.is_empty() {
            tracing::warn!(record_id = %record.id, "Record has empty title and content, skipping");
            report.skipped_empty += 1;
            return;
        }

        let vector = match self.provider.embed(&text).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    record_id = %record.id,
                    kind = e.kind(),
                    error = %e,
                    "Failed to generate embedding"
                );
                report.provider_failures += 1;
                return;
            }
        };

        match self.writer.write_embedding(&record.id, &vector).await {
            Ok(()) => {
                tracing::info!(record_id = %record.id, "Updated embedding");
                report.embedded += 1;
            }
            Err(WriteError::NotFound { .. }) => {
                tracing::warn!(record_id = %record.id, "Record vanished before embedding write");
                report.write_failures += 1;
            }
            Err(e) => {
                tracing::error!(record_id = %record.id, error = %e, "Failed to write embedding");
                report.write_failures += 1;
            }
        }
    }
}

impl CycleReport {
    fn attempted(&self) -> usize {
        self.embedded + self.skipped_empty + self.provider_failures + self.write_failures
    }
}
