//! Cascading fallback resolution over an ordered provider chain.
//!
//! - [`FallbackPipeline`] - tries providers in order, stops at the first find
//! - [`FetchOutcome`] - the uniform per-record result the orchestrator applies
//! - [`FetchError`] - why a record was given up on rather than exhausted

mod outcome;
mod pipeline;

pub use outcome::{FetchError, FetchOutcome, NO_PROVIDER};
pub use pipeline::FallbackPipeline;
