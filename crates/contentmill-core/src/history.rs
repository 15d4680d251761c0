//! Generation history and the "too similar to recent output" check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::fitness::Misfit;

/// One previously produced text value. The history is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub channel: String,
    pub text: String,
    pub classification: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl GenerationRecord {
    pub fn new(
        channel: impl Into<String>,
        text: impl Into<String>,
        classification: Option<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            text: text.into(),
            classification,
            created_at: Utc::now(),
        }
    }
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Jaccard similarity of the two texts' lowercase word sets, in `[0, 1]`.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let a = words(a);
    let b = words(b);
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }

    let shared = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    shared / union
}

/// Highest similarity between `candidate` and any history entry.
pub fn max_similarity(candidate: &str, history: &[GenerationRecord]) -> f64 {
    history
        .iter()
        .map(|record| jaccard(candidate, &record.text))
        .fold(0.0, f64::max)
}

/// Reject `candidate` when it is at least `threshold` similar to any
/// entry of `history`.
pub fn check_novelty(
    candidate: &str,
    history: &[GenerationRecord],
    threshold: f64,
) -> Result<(), Misfit> {
    let similarity = max_similarity(candidate, history);
    if similarity >= threshold {
        return Err(Misfit::TooSimilar {
            similarity,
            threshold,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard("Be kind.", "be KIND"), 1.0);
        assert_eq!(jaccard("alpha beta", "gamma delta"), 0.0);
        assert!((jaccard("a b c d", "a b x y") - 2.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_check_novelty() {
        let history = vec![GenerationRecord::new(
            "quotes",
            "The best time to start is now.",
            None,
        )];

        assert!(check_novelty("Start now, the best time is now", &history, 0.8).is_err());
        assert!(check_novelty("Rest is part of the work.", &history, 0.8).is_ok());
        assert!(check_novelty("anything", &[], 0.8).is_ok());
    }
}
