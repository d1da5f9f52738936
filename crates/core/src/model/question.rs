use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::QuestionId;

/// Smallest number of options a question may offer.
pub const MIN_OPTIONS: usize = 2;
/// Largest number of options a question may offer.
pub const MAX_OPTIONS: usize = 10;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question text cannot be empty")]
    EmptyText,

    #[error("question position must be >= 1")]
    InvalidPosition,

    #[error("question must have between {MIN_OPTIONS} and {MAX_OPTIONS} options, got {count}")]
    OptionCount { count: usize },

    #[error("option {index} text cannot be empty")]
    EmptyOption { index: usize },

    #[error("question must have at least one correct option")]
    NoCorrectOption,

    #[error("correct option {index} is out of range for {len} options")]
    CorrectOptionOutOfRange { index: usize, len: usize },
}

//
// ─── CHOICE KIND ───────────────────────────────────────────────────────────────
//

/// How many options a student is expected to pick.
///
/// Derived from the size of the correct-option set: one correct option makes a
/// single-choice question, more than one makes a multiple-choice question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChoiceKind {
    Single,
    Multiple,
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

/// A question of a test, as handed to a session by the question bank.
///
/// Correct answers are always held as a set of option indices; a legacy scalar
/// correct answer is just a singleton set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    id: QuestionId,
    position: u32,
    text: String,
    options: Vec<String>,
    correct_options: BTreeSet<usize>,
}

impl Question {
    /// Build a validated question.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` if the text is blank, the position is zero, the
    /// option count is outside `2..=10`, an option is blank, or the correct set
    /// is empty or references a missing option.
    pub fn new(
        id: QuestionId,
        position: u32,
        text: impl Into<String>,
        options: Vec<String>,
        correct_options: impl IntoIterator<Item = usize>,
    ) -> Result<Self, QuestionError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(QuestionError::EmptyText);
        }
        if position == 0 {
            return Err(QuestionError::InvalidPosition);
        }
        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&options.len()) {
            return Err(QuestionError::OptionCount {
                count: options.len(),
            });
        }
        if let Some(index) = options.iter().position(|o| o.trim().is_empty()) {
            return Err(QuestionError::EmptyOption { index });
        }

        let correct_options: BTreeSet<usize> = correct_options.into_iter().collect();
        if correct_options.is_empty() {
            return Err(QuestionError::NoCorrectOption);
        }
        if let Some(&index) = correct_options.iter().find(|&&i| i >= options.len()) {
            return Err(QuestionError::CorrectOptionOutOfRange {
                index,
                len: options.len(),
            });
        }

        Ok(Self {
            id,
            position,
            text,
            options,
            correct_options,
        })
    }

    /// Build a question from the legacy single-answer shape.
    ///
    /// # Errors
    ///
    /// Same as [`Question::new`].
    pub fn with_single_correct(
        id: QuestionId,
        position: u32,
        text: impl Into<String>,
        options: Vec<String>,
        correct_option: usize,
    ) -> Result<Self, QuestionError> {
        Self::new(id, position, text, options, [correct_option])
    }

    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    /// 1-based position of the question within its test.
    #[must_use]
    pub fn position(&self) -> u32 {
        self.position
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }

    #[must_use]
    pub fn option_count(&self) -> usize {
        self.options.len()
    }

    #[must_use]
    pub fn correct_options(&self) -> &BTreeSet<usize> {
        &self.correct_options
    }

    #[must_use]
    pub fn kind(&self) -> ChoiceKind {
        if self.correct_options.len() > 1 {
            ChoiceKind::Multiple
        } else {
            ChoiceKind::Single
        }
    }

    /// Display label, e.g. `Q3: What is ...`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("Q{}: {}", self.position, self.text)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
