//! Anti-repetition for visual variants.

use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::VecDeque;

/// The most recent variant choices, bounded to the consecutive-use limit.
///
/// The scheduler owns one of these and passes it into every selection.
/// Updates are read, decide, append with no atomicity across processes: two
/// schedulers running at once may each see the same history and push a
/// variant one past the limit. Scheduling runs about once a day, so that
/// drift is tolerated.
#[derive(Debug, Clone)]
pub struct VariantRotation {
    max_consecutive: usize,
    recent: VecDeque<String>,
}

impl VariantRotation {
    pub fn new(max_consecutive: usize) -> Self {
        let max_consecutive = max_consecutive.max(1);
        Self {
            max_consecutive,
            recent: VecDeque::with_capacity(max_consecutive),
        }
    }

    /// Rebuild from persisted history, oldest first.
    pub fn seeded(max_consecutive: usize, history: impl IntoIterator<Item = String>) -> Self {
        let mut rotation = Self::new(max_consecutive);
        for variant in history {
            rotation.record(variant);
        }
        rotation
    }

    pub fn record(&mut self, variant: String) {
        if self.recent.len() == self.max_consecutive {
            self.recent.pop_front();
        }
        self.recent.push_back(variant);
    }

    /// Oldest first.
    pub fn recent(&self) -> impl Iterator<Item = &str> {
        self.recent.iter().map(String::as_str)
    }

    /// The variant that may not be chosen next: the last one, if it filled
    /// every one of the last `max_consecutive` slots.
    pub fn blocked(&self) -> Option<&str> {
        let last = self.recent.back()?;
        (self.recent.len() == self.max_consecutive && self.recent.iter().all(|v| v == last))
            .then_some(last.as_str())
    }

    /// Pick uniformly among `candidates`, excluding the blocked variant
    /// unless that would leave nothing to pick. Records the choice.
    pub fn select<R: Rng + ?Sized>(&mut self, candidates: &[String], rng: &mut R) -> Option<String> {
        let blocked = self.blocked();
        let allowed: Vec<&String> = candidates
            .iter()
            .filter(|c| Some(c.as_str()) != blocked)
            .collect();

        let choice = if allowed.is_empty() {
            candidates.choose(rng)
        } else {
            allowed.choose(rng).copied()
        }?
        .clone();

        self.record(choice.clone());
        Some(choice)
    }
}
