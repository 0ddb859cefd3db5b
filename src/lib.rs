//! Enricher Core Library
//!
//! Deduplicates bibliographic records gathered from several scholarly
//! sources and enriches the survivors with abstracts and PDFs, trying an
//! ordered chain of providers per record under per-provider rate limits.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`record`] - Record model and the read-only provider query
//! - [`similarity`] - Jaccard title similarity
//! - [`dedup`] - Exact-DOI and fuzzy-title deduplication
//! - [`rate_limiter`] - Per-provider minimum-interval gate
//! - [`provider`] - Provider trait, shared HTTP policy, concrete providers
//! - [`artifact`] - Streaming PDF download and validation
//! - [`fetch`] - Fallback chain resolution
//! - [`worker_pool`] - Bounded-concurrency fan-out
//! - [`orchestrator`] - Run sequencing and statistics
//! - [`config`] - Run configuration and pipeline builders

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod artifact;
pub mod config;
pub mod dedup;
pub mod fetch;
pub mod orchestrator;
pub mod provider;
pub mod rate_limiter;
pub mod record;
pub mod similarity;
pub mod worker_pool;

mod user_agent;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use artifact::{ArtifactValidator, PdfArtifact, PdfDownloader, Verdict};
pub use config::{ConfigError, EnrichConfig};
pub use dedup::{DedupOutcome, Deduplicator, dedupe};
pub use fetch::{FallbackPipeline, FetchError, FetchOutcome};
pub use orchestrator::{PdfPolicy, PipelineOrchestrator, RunReport, RunStatistics, StageStatistics};
pub use provider::{FetchStep, Payload, Provider, ProviderError, Purpose, Target};
pub use rate_limiter::RateLimiter;
pub use record::{AbstractSource, Confidence, ProviderQuery, Record};
pub use worker_pool::{PoolError, RecordResult, WorkerFailure, WorkerPool};
