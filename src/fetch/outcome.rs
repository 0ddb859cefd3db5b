//! Per-record fetch outcome.

use serde::Serialize;

use crate::provider::{Found, Payload};
use crate::record::Confidence;

/// Provider name reported when no provider produced a result.
pub const NO_PROVIDER: &str = "None";

/// Why a chain stopped without exhausting its providers.
///
/// Distinct from exhaustion so callers can tell "gave up" from "ran out of
/// options".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "kebab-case")]
pub enum FetchError {
    /// The caller's cancellation token fired.
    #[error("cancelled before a provider succeeded")]
    Cancelled,
    /// The per-record time budget elapsed.
    #[error("per-record time budget elapsed")]
    TimedOut,
}

/// Result of resolving one record against a provider chain.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    /// True when a provider produced an accepted payload.
    pub found: bool,
    /// The accepted payload; `Some` exactly when `found`.
    pub payload: Option<Payload>,
    /// Role label of the provider that succeeded, or [`NO_PROVIDER`].
    pub provider_name: String,
    pub confidence: Confidence,
    /// Set when the chain was cut short; `None` on success and exhaustion.
    pub error: Option<FetchError>,
    /// Number of providers actually called.
    pub attempted: usize,
}

impl FetchOutcome {
    /// Outcome for a provider that produced `found`.
    #[must_use]
    pub fn success(provider_name: impl Into<String>, found: Found, attempted: usize) -> Self {
        Self {
            found: true,
            payload: Some(found.payload),
            provider_name: provider_name.into(),
            confidence: found.confidence,
            error: None,
            attempted,
        }
    }

    /// Outcome when every provider declined or failed.
    #[must_use]
    pub fn exhausted(attempted: usize) -> Self {
        Self {
            found: false,
            payload: None,
            provider_name: NO_PROVIDER.to_string(),
            confidence: Confidence::None,
            error: None,
            attempted,
        }
    }

    /// Outcome when the chain was cancelled.
    #[must_use]
    pub fn cancelled(attempted: usize) -> Self {
        Self {
            error: Some(FetchError::Cancelled),
            ..Self::exhausted(attempted)
        }
    }

    /// Outcome when the per-record budget ran out.
    #[must_use]
    pub fn timed_out() -> Self {
        Self {
            error: Some(FetchError::TimedOut),
            ..Self::exhausted(0)
        }
    }

    /// Returns true when every provider was tried without success.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        !self.found && self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_is_distinct_from_cancelled() {
        let exhausted = FetchOutcome::exhausted(4);
        assert!(exhausted.is_exhausted());
        assert_eq!(exhausted.provider_name, "None");
        assert_eq!(exhausted.confidence, Confidence::None);

        let cancelled = FetchOutcome::cancelled(1);
        assert!(!cancelled.found);
        assert!(!cancelled.is_exhausted());
        assert_eq!(cancelled.error, Some(FetchError::Cancelled));
        assert_eq!(cancelled.provider_name, "None");
    }

    #[test]
    fn test_success_carries_payload() {
        let outcome = FetchOutcome::success(
            "doi-registry",
            Found {
                payload: Payload::Text("abstract".into()),
                confidence: Confidence::High,
            },
            3,
        );
        assert!(outcome.found);
        assert_eq!(outcome.payload.as_ref().and_then(Payload::as_text), Some("abstract"));
        assert_eq!(outcome.attempted, 3);
    }

    #[test]
    fn test_timed_out_error_message() {
        let outcome = FetchOutcome::timed_out();
        assert_eq!(outcome.error, Some(FetchError::TimedOut));
        assert_eq!(
            FetchError::TimedOut.to_string(),
            "per-record time budget elapsed"
        );
    }
}
