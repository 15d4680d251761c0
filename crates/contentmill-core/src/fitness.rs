//! Template fitness predicate.
//!
//! A candidate text fits a template when it is within the template's
//! character budget and wraps into the template's line slots. The check is
//! pure so the retry loop can run it identically on every attempt.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Layout limits of a render template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateConstraints {
    /// Maximum number of characters, whitespace included.
    pub max_chars: usize,
    /// Minimum number of characters, whitespace included.
    pub min_chars: usize,
    /// Maximum number of rendered lines after word wrapping.
    pub max_lines: usize,
    /// Characters that fit on one rendered line.
    pub max_line_chars: usize,
}

impl Default for TemplateConstraints {
    fn default() -> Self {
        Self {
            max_chars: 220,
            min_chars: 12,
            max_lines: 6,
            max_line_chars: 42,
        }
    }
}

/// Why a candidate was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Misfit {
    #[error("empty text")]
    Empty,

    #[error("too short: {len} chars, minimum {min}")]
    TooShort { len: usize, min: usize },

    #[error("too long: {len} chars, maximum {max}")]
    TooLong { len: usize, max: usize },

    #[error("word of {len} chars cannot wrap into a {max}-char line")]
    WordTooWide { len: usize, max: usize },

    #[error("wraps to {lines} lines, template holds {max}")]
    TooManyLines { lines: usize, max: usize },

    #[error("too similar to recent text ({similarity:.2} >= {threshold:.2})")]
    TooSimilar { similarity: f64, threshold: f64 },
}

impl TemplateConstraints {
    pub fn check(&self, text: &str) -> Result<(), Misfit> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Misfit::Empty);
        }

        let len = text.chars().count();
        if len < self.min_chars {
            return Err(Misfit::TooShort {
                len,
                min: self.min_chars,
            });
        }
        if len > self.max_chars {
            return Err(Misfit::TooLong {
                len,
                max: self.max_chars,
            });
        }

        let lines = self.wrapped_lines(text)?;
        if lines > self.max_lines {
            return Err(Misfit::TooManyLines {
                lines,
                max: self.max_lines,
            });
        }

        Ok(())
    }

    /// Greedy word wrap; explicit newlines start a new line.
    pub fn wrapped_lines(&self, text: &str) -> Result<usize, Misfit> {
        let mut total = 0;

        for paragraph in text.lines() {
            let mut current = 0usize;
            let mut lines = 1;

            for word in paragraph.split_whitespace() {
                let width = word.chars().count();
                if width > self.max_line_chars {
                    return Err(Misfit::WordTooWide {
                        len: width,
                        max: self.max_line_chars,
                    });
                }

                if current == 0 {
                    current = width;
                } else if current + 1 + width <= self.max_line_chars {
                    current += 1 + width;
                } else {
                    lines += 1;
                    current = width;
                }
            }

            total += lines;
        }

        Ok(total)
    }
}
