//! Bounded "generate until it fits" loop.
//!
//! The loop knows nothing about where candidates come from or what makes
//! them fit: both are injected, which keeps it testable with a scripted
//! generator.

use contentmill_core::fitness::{Misfit, TemplateConstraints};
use contentmill_core::history::{GenerationRecord, check_novelty};
use contentmill_core::{Error, Result};
use std::future::Future;
use tracing::debug;

/// One generated (or fallback) text to be judged.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub text: String,
    pub classification: Option<String>,
    /// The text is the local fallback because the generator failed.
    pub used_fallback: bool,
}

/// A candidate that passed the predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Accepted {
    pub text: String,
    pub classification: Option<String>,
    /// 1-based attempt that produced the text.
    pub attempts: u32,
    pub used_fallback: bool,
}

/// Call `generate(attempt, previous_rejection)` until `fits` accepts its
/// text or `max_attempts` candidates have been rejected.
///
/// Attempts run back to back with no backoff: a rejection means the text
/// did not fit, not that something transient went wrong.
pub async fn generate_until_fit<G, Fut, P>(
    max_attempts: u32,
    mut generate: G,
    fits: P,
) -> Result<Accepted>
where
    G: FnMut(u32, Option<String>) -> Fut,
    Fut: Future<Output = Candidate>,
    P: Fn(&str) -> std::result::Result<(), Misfit>,
{
    let mut last_rejection: Option<String> = None;

    for attempt in 1..=max_attempts {
        let candidate = generate(attempt, last_rejection.clone()).await;

        match fits(&candidate.text) {
            Ok(()) => {
                debug!(attempt, fallback = candidate.used_fallback, "candidate accepted");
                return Ok(Accepted {
                    text: candidate.text.trim().to_string(),
                    classification: candidate.classification,
                    attempts: attempt,
                    used_fallback: candidate.used_fallback,
                });
            }
            Err(misfit) => {
                debug!(attempt, reason = %misfit, "candidate rejected");
                last_rejection = Some(misfit.to_string());
            }
        }
    }

    Err(Error::GenerationExhausted {
        attempts: max_attempts,
        last_rejection: last_rejection.unwrap_or_else(|| "no attempts allowed".to_string()),
    })
}

/// The predicate the content stage uses: the text must fit the template
/// and must not repeat recent output.
pub struct FitnessCheck<'a> {
    pub template: &'a TemplateConstraints,
    pub history: &'a [GenerationRecord],
    pub similarity_threshold: f64,
}

impl FitnessCheck<'_> {
    pub fn check(&self, text: &str) -> std::result::Result<(), Misfit> {
        self.template.check(text)?;
        check_novelty(text, self.history, self.similarity_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contentmill_core::ErrorKind;
    use std::cell::RefCell;

    fn candidate(text: &str) -> Candidate {
        Candidate {
            text: text.to_string(),
            classification: None,
            used_fallback: false,
        }
    }

    /// Scripted generator: hands out `texts` in order, recording the
    /// rejection reasons it was given.
    fn scripted<'a>(
        texts: Vec<&'static str>,
        seen: &'a RefCell<Vec<Option<String>>>,
    ) -> impl FnMut(u32, Option<String>) -> std::future::Ready<Candidate> + 'a {
        move |attempt, rejection| {
            seen.borrow_mut().push(rejection);
            let text = texts[(attempt as usize - 1).min(texts.len() - 1)];
            std::future::ready(candidate(text))
        }
    }

    fn short_template() -> TemplateConstraints {
        TemplateConstraints {
            max_chars: 30,
            min_chars: 5,
            max_lines: 2,
            max_line_chars: 15,
        }
    }

    #[tokio::test]
    async fn test_accepts_first_fitting_candidate() {
        let template = short_template();
        let seen = RefCell::new(Vec::new());
        let generator = scripted(
            vec![
                "this sentence is far too long for the little template",
                "fits nicely",
            ],
            &seen,
        );

        let accepted = generate_until_fit(5, generator, |t| template.check(t))
            .await
            .unwrap();
        assert_eq!(accepted.text, "fits nicely");
        assert_eq!(accepted.attempts, 2);

        let seen = seen.into_inner();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_none());
        assert!(seen[1].as_deref().unwrap().starts_with("too long"));
    }

    #[tokio::test]
    async fn test_exhaustion_is_bounded() {
        let template = short_template();
        let seen = RefCell::new(Vec::new());
        let generator = scripted(vec!["nope"], &seen);

        let err = generate_until_fit(3, generator, |t| template.check(t))
            .await
            .unwrap_err();
        assert_eq!(seen.borrow().len(), 3);
        assert_eq!(err.kind(), ErrorKind::GenerationExhausted);
        match err {
            Error::GenerationExhausted {
                attempts,
                last_rejection,
            } => {
                assert_eq!(attempts, 3);
                assert!(!last_rejection.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fitness_check_rejects_repeats() {
        let template = TemplateConstraints::default();
        let history = vec![GenerationRecord::new(
            "quotes",
            "Every morning is a fresh start",
            None,
        )];
        let check = FitnessCheck {
            template: &template,
            history: &history,
            similarity_threshold: 0.8,
        };

        assert!(matches!(
            check.check("every morning is a fresh start!"),
            Err(Misfit::TooSimilar { .. })
        ));
        assert!(check.check("Patience turns effort into results").is_ok());
    }
}
