//! Title similarity scoring.
//!
//! [`score`] is a token-set Jaccard similarity over lowercase
//! whitespace-separated tokens. It does not strip punctuation; callers that
//! need to ignore punctuation pass titles through [`normalize_title`] first.

use std::collections::HashSet;

/// Jaccard similarity of the lowercase whitespace token sets of `a` and `b`.
///
/// Returns a value in `[0.0, 1.0]`; returns `0.0` when either side has no
/// tokens.
///
/// # Examples
///
/// ```
/// use enricher_core::similarity::score;
///
/// assert_eq!(score("Edge Caching", "edge caching"), 1.0);
/// assert_eq!(score("", "edge"), 0.0);
/// ```
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn score(a: &str, b: &str) -> f64 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let left: HashSet<&str> = a_lower.split_whitespace().collect();
    let right: HashSet<&str> = b_lower.split_whitespace().collect();

    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let intersection = left.intersection(&right).count();
    let union = left.union(&right).count();
    intersection as f64 / union as f64
}

/// Lowercases, replaces punctuation with spaces, and collapses whitespace.
///
/// # Examples
///
/// ```
/// use enricher_core::similarity::normalize_title;
///
/// assert_eq!(normalize_title("  Fast Caching: A Survey!  "), "fast caching a survey");
/// ```
#[must_use]
pub fn normalize_title(title: &str) -> String {
    let cleaned: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Scores two titles after normalizing both.
///
/// This is what providers use to confirm a candidate title against the query.
#[must_use]
pub fn title_score(a: &str, b: &str) -> f64 {
    score(&normalize_title(a), &normalize_title(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TITLES: [&str; 6] = [
        "Fast Caching for Edge Functions",
        "fast caching for edge function",
        "A Survey of Consensus Protocols",
        "",
        "   ",
        "Consensus",
    ];

    #[test]
    fn test_score_is_symmetric() {
        for a in TITLES {
            for b in TITLES {
                assert!(
                    (score(a, b) - score(b, a)).abs() < f64::EPSILON,
                    "asymmetric for {a:?} / {b:?}"
                );
            }
        }
    }

    #[test]
    fn test_score_is_bounded() {
        for a in TITLES {
            for b in TITLES {
                let s = score(a, b);
                assert!((0.0..=1.0).contains(&s), "{s} out of range");
            }
        }
    }

    #[test]
    fn test_score_identity_is_one() {
        assert!((score("Consensus protocols", "Consensus protocols") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_score_empty_is_zero() {
        assert_eq!(score("", "x"), 0.0);
        assert_eq!(score("x", ""), 0.0);
        assert_eq!(score("", ""), 0.0);
        assert_eq!(score("   ", "x"), 0.0);
    }

    #[test]
    fn test_score_is_case_insensitive() {
        assert!((score("EDGE Functions", "edge functions") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_score_counts_distinct_tokens() {
        // {fast, caching, for, edge} shared; {functions, function} differ => 4/6
        let s = score(
            "Fast Caching for Edge Functions",
            "Fast Caching for Edge Function",
        );
        assert!((s - 4.0 / 6.0).abs() < 1e-9, "got {s}");
    }

    #[test]
    fn test_score_keeps_punctuation_attached() {
        assert!(score("caching:", "caching") < 1.0);
    }

    #[test]
    fn test_normalize_title_strips_punctuation() {
        assert_eq!(
            normalize_title("Deep-Learning, Revisited (2nd ed.)"),
            "deep learning revisited 2nd ed"
        );
    }

    #[test]
    fn test_title_score_ignores_punctuation() {
        assert!((title_score("Caching: a survey", "caching a survey") - 1.0).abs() < f64::EPSILON);
    }
}
