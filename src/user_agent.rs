//! User-Agent string for all outbound provider and artifact traffic.
//!
//! Scholarly APIs (Crossref, arXiv, Semantic Scholar) ask clients to identify
//! themselves; every request carries the same identifier.

/// Project URL advertised in the User-Agent.
const PROJECT_UA_URL: &str = "https://github.com/enricher-rs/enricher";

/// Default User-Agent for provider and PDF requests.
#[must_use]
pub(crate) fn default_provider_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("enricher/{version} (bibliographic-enrichment; +{PROJECT_UA_URL})")
}
