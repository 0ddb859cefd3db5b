//! Run-level composition: dedupe, then abstracts, then PDFs.
//!
//! The orchestrator owns [`RunStatistics`]. Counters change only where a
//! worker's result is joined back on the calling task, so no counter is
//! ever shared with a worker.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::dedup::Deduplicator;
use crate::fetch::{FallbackPipeline, FetchError, FetchOutcome};
use crate::provider::Payload;
use crate::record::Record;
use crate::worker_pool::{PoolError, RecordResult, WorkerPool};

/// Which records the PDF stage runs for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PdfPolicy {
    /// Every record without a stored PDF.
    #[default]
    All,
    /// Only records that have an abstract after the abstract stage.
    AbstractFound,
    /// The PDF stage is skipped.
    Never,
}

impl fmt::Display for PdfPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::AbstractFound => f.write_str("abstract-found"),
            Self::Never => f.write_str("never"),
        }
    }
}

/// Counters for one enrichment stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageStatistics {
    /// Records handed to the stage's chain.
    pub attempted: usize,
    /// Records the stage did not run for (already enriched, or excluded by policy).
    pub skipped: usize,
    /// Successes per provider role label.
    pub succeeded: BTreeMap<String, usize>,
    /// Records for which every provider declined or failed.
    pub not_found: usize,
    pub cancelled: usize,
    /// Worker-level failures: panics and per-record timeouts.
    pub failed: usize,
}

impl StageStatistics {
    /// Total successes across providers.
    #[must_use]
    pub fn total_succeeded(&self) -> usize {
        self.succeeded.values().sum()
    }

    fn record(&mut self, outcome: &FetchOutcome) {
        self.attempted += 1;
        if outcome.found {
            *self
                .succeeded
                .entry(outcome.provider_name.clone())
                .or_default() += 1;
            return;
        }
        match outcome.error {
            None => self.not_found += 1,
            Some(FetchError::Cancelled) => self.cancelled += 1,
            Some(FetchError::TimedOut) => self.failed += 1,
        }
    }
}

/// Counters for a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    pub input_records: usize,
    pub duplicates_removed: usize,
    pub abstracts: StageStatistics,
    pub pdfs: StageStatistics,
}

/// Enriched records plus the run's statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Deduplicated records in input order, with enrichment applied.
    pub records: Vec<Record>,
    pub stats: RunStatistics,
}

/// A chain plus the pool it runs on.
#[derive(Debug, Clone)]
struct Stage {
    pipeline: FallbackPipeline,
    pool: WorkerPool,
}

/// Sequences deduplication and the two enrichment stages.
///
/// A stage that was never configured is skipped; every record counts as
/// skipped for it.
#[derive(Debug, Clone)]
pub struct PipelineOrchestrator {
    deduplicator: Deduplicator,
    abstracts: Option<Stage>,
    pdfs: Option<Stage>,
    pdf_policy: PdfPolicy,
}

impl PipelineOrchestrator {
    /// Creates an orchestrator that only deduplicates.
    #[must_use]
    pub fn new(deduplicator: Deduplicator) -> Self {
        Self {
            deduplicator,
            abstracts: None,
            pdfs: None,
            pdf_policy: PdfPolicy::default(),
        }
    }

    /// Enables the abstract stage.
    #[must_use]
    pub fn with_abstract_stage(mut self, pipeline: FallbackPipeline, pool: WorkerPool) -> Self {
        self.abstracts = Some(Stage { pipeline, pool });
        self
    }

    /// Enables the PDF stage.
    #[must_use]
    pub fn with_pdf_stage(mut self, pipeline: FallbackPipeline, pool: WorkerPool) -> Self {
        self.pdfs = Some(Stage { pipeline, pool });
        self
    }

    /// Sets which records the PDF stage runs for.
    #[must_use]
    pub fn with_pdf_policy(mut self, policy: PdfPolicy) -> Self {
        self.pdf_policy = policy;
        self
    }

    /// Returns the deduplicator used by [`run`](Self::run).
    #[must_use]
    pub fn deduplicator(&self) -> &Deduplicator {
        &self.deduplicator
    }

    /// Deduplicates `records` and enriches the survivors.
    ///
    /// Always completes with a per-record result: exhausted, cancelled, and
    /// failed records are counted and left unenriched.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError`] only if a worker pool cannot schedule tasks.
    #[instrument(skip_all, fields(input = records.len()))]
    pub async fn run(
        &self,
        records: Vec<Record>,
        cancel: &CancellationToken,
    ) -> Result<RunReport, PoolError> {
        let mut stats = RunStatistics {
            input_records: records.len(),
            ..RunStatistics::default()
        };

        let mut records = records;
        for record in &mut records {
            record.normalize_abstract_source();
        }

        let deduped = self.deduplicator.dedupe(records);
        stats.duplicates_removed = deduped.removed;
        let mut records = deduped.unique;

        match &self.abstracts {
            Some(stage) => {
                let eligible: Vec<usize> = (0..records.len())
                    .filter(|&i| !records[i].has_abstract())
                    .collect();
                stats.abstracts.skipped = records.len() - eligible.len();
                for (index, outcome) in run_stage(stage, &records, &eligible, cancel).await? {
                    stats.abstracts.record(&outcome);
                    apply_abstract(&mut records[index], outcome);
                }
            }
            None => stats.abstracts.skipped = records.len(),
        }

        match (&self.pdfs, self.pdf_policy) {
            (Some(stage), policy) if policy != PdfPolicy::Never => {
                let eligible: Vec<usize> = (0..records.len())
                    .filter(|&i| {
                        let record = &records[i];
                        !record.has_pdf()
                            && (policy == PdfPolicy::All || record.has_abstract())
                    })
                    .collect();
                stats.pdfs.skipped = records.len() - eligible.len();
                for (index, outcome) in run_stage(stage, &records, &eligible, cancel).await? {
                    stats.pdfs.record(&outcome);
                    apply_pdf(&mut records[index], outcome);
                }
            }
            _ => stats.pdfs.skipped = records.len(),
        }

        info!(
            input = stats.input_records,
            duplicates_removed = stats.duplicates_removed,
            abstracts_found = stats.abstracts.total_succeeded(),
            abstracts_not_found = stats.abstracts.not_found,
            pdfs_found = stats.pdfs.total_succeeded(),
            pdfs_not_found = stats.pdfs.not_found,
            cancelled = stats.abstracts.cancelled + stats.pdfs.cancelled,
            failed = stats.abstracts.failed + stats.pdfs.failed,
            "enrichment run complete"
        );

        Ok(RunReport { records, stats })
    }
}

/// Runs `stage` for the records at `eligible` and returns outcomes keyed by
/// position in `records`.
///
/// Position is the join key because input ids need not be unique when ids
/// are not reassigned.
async fn run_stage(
    stage: &Stage,
    records: &[Record],
    eligible: &[usize],
    cancel: &CancellationToken,
) -> Result<Vec<(usize, FetchOutcome)>, PoolError> {
    let items = eligible
        .iter()
        .map(|&index| (index as u64, records[index].query()));

    let results = stage
        .pool
        .run_all(items, |query| {
            let pipeline = stage.pipeline.clone();
            let cancel = cancel.clone();
            async move { pipeline.resolve(&query, &cancel).await }
        })
        .await?;

    Ok(results.into_iter().filter_map(joined_outcome).collect())
}

fn joined_outcome(result: RecordResult<FetchOutcome>) -> Option<(usize, FetchOutcome)> {
    let index = usize::try_from(result.record_id).ok()?;
    let outcome = match result.outcome {
        Ok(outcome) => outcome,
        Err(failure) => {
            warn!(index, error = %failure, "record produced no outcome");
            FetchOutcome::timed_out()
        }
    };
    Some((index, outcome))
}

fn apply_abstract(record: &mut Record, outcome: FetchOutcome) {
    if let Some(Payload::Text(text)) = outcome.payload {
        record.set_fetched_abstract(text, outcome.provider_name, outcome.confidence);
    }
}

fn apply_pdf(record: &mut Record, outcome: FetchOutcome) {
    if let Some(Payload::Pdf(artifact)) = outcome.payload {
        record.pdf_path = Some(artifact.path);
        record.pdf_source = Some(outcome.provider_name);
    }
}
