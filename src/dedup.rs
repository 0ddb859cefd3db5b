//! Near-duplicate removal for record batches.
//!
//! A record is a duplicate when its DOI was already seen, or when its
//! normalized title scores strictly above the title threshold against any
//! previously accepted title. Input order decides the survivor: the first
//! occurrence wins and later duplicates are dropped, never merged.
//!
//! Titles are compared on a dedup key rather than the raw similarity input:
//! the normalized title with a trailing plural `s` folded off longer tokens.
//! "Fast Caching for Edge Functions" against "Fast Caching for Edge Function"
//! therefore scores 1.0 here, where plain token Jaccard gives 4/6.
//!
//! Matching is O(n²) over accepted titles: every new record is compared
//! against every title accepted so far. Batches are expected to be in the
//! hundreds of records.

use std::collections::HashSet;

use tracing::{debug, info, instrument};

use crate::record::{Record, bare_doi};
use crate::similarity::{normalize_title, score};

/// Default fuzzy-title threshold.
pub const DEFAULT_TITLE_THRESHOLD: f64 = 0.8;

/// Looser threshold for merging raw results from several queries/providers.
pub const LOOSE_MERGE_THRESHOLD: f64 = 0.6;

/// Stricter threshold for a final consolidation pass.
pub const STRICT_CONSOLIDATION_THRESHOLD: f64 = 0.85;

/// Result of a deduplication pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupOutcome {
    /// Survivors in input order.
    pub unique: Vec<Record>,
    /// `input count - survivor count`.
    pub removed: usize,
}

/// Exact-DOI and fuzzy-title deduplicator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deduplicator {
    title_threshold: f64,
    reassign_ids: bool,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_TITLE_THRESHOLD)
    }
}

impl Deduplicator {
    /// Creates a deduplicator with the given title threshold.
    ///
    /// The threshold is clamped to `[0.0, 1.0]`; ids are not reassigned.
    #[must_use]
    pub fn new(title_threshold: f64) -> Self {
        Self {
            title_threshold: title_threshold.clamp(0.0, 1.0),
            reassign_ids: false,
        }
    }

    /// Reassigns sequential ids (starting at 1) to survivors in output order.
    #[must_use]
    pub fn with_reassigned_ids(mut self, reassign: bool) -> Self {
        self.reassign_ids = reassign;
        self
    }

    /// Returns the configured title threshold.
    #[must_use]
    pub fn title_threshold(&self) -> f64 {
        self.title_threshold
    }

    /// Removes duplicates from `records`, preserving input order.
    #[instrument(skip_all, fields(input = records.len(), threshold = self.title_threshold))]
    pub fn dedupe(&self, records: Vec<Record>) -> DedupOutcome {
        let input_count = records.len();
        let mut seen_dois: HashSet<String> = HashSet::new();
        let mut seen_titles: Vec<String> = Vec::new();
        let mut unique = Vec::with_capacity(records.len());

        for record in records {
            let doi_key = record.doi().map(normalize_doi);
            if let Some(doi) = &doi_key
                && seen_dois.contains(doi)
            {
                debug!(id = record.id, doi = %doi, "dropping duplicate DOI");
                continue;
            }

            let title_key = dedup_title_key(&record.title);
            if !title_key.is_empty()
                && let Some(matched) = seen_titles
                    .iter()
                    .find(|seen| score(&title_key, seen) > self.title_threshold)
            {
                debug!(
                    id = record.id,
                    title = %record.title,
                    matched = %matched,
                    "dropping near-duplicate title"
                );
                continue;
            }

            if let Some(doi) = doi_key {
                seen_dois.insert(doi);
            }
            if !title_key.is_empty() {
                seen_titles.push(title_key);
            }
            unique.push(record);
        }

        if self.reassign_ids {
            for (index, record) in unique.iter_mut().enumerate() {
                record.id = index as u64 + 1;
            }
        }

        let removed = input_count - unique.len();
        info!(
            survivors = unique.len(),
            removed, "deduplication complete"
        );
        DedupOutcome { unique, removed }
    }
}

/// Convenience wrapper: dedupe with `title_threshold` and no id reassignment.
#[must_use]
pub fn dedupe(records: Vec<Record>, title_threshold: f64) -> DedupOutcome {
    Deduplicator::new(title_threshold).dedupe(records)
}

/// Canonical DOI form for exact matching.
///
/// Strips resolver prefixes with [`bare_doi`] and lowercases the rest.
///
/// # Examples
///
/// ```
/// use enricher_core::dedup::normalize_doi;
///
/// assert_eq!(normalize_doi("https://doi.org/10.1/ABC"), "10.1/abc");
/// assert_eq!(normalize_doi("doi:10.1/X"), "10.1/x");
/// ```
#[must_use]
pub fn normalize_doi(doi: &str) -> String {
    bare_doi(doi).to_lowercase()
}

/// Title key for fuzzy matching: normalized title with simple plural folding.
///
/// Tokens longer than three characters ending in a single `s` lose it, so
/// "Functions" and "Function" produce the same token.
fn dedup_title_key(title: &str) -> String {
    normalize_title(title)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(fold_plural)
        .collect::<Vec<_>>()
        .join(" ")
}

fn fold_plural(token: &str) -> &str {
    if token.chars().count() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        &token[..token.len() - 1]
    } else {
        token
    }
}
