use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::question::{ChoiceKind, Question};

/// Marker used by front-ends for "no option selected" on a single-choice question.
pub const UNSELECTED: i64 = -1;

/// An answer held in the session ledger.
///
/// `Single(None)` and an empty `Multiple` set are the "no answer" sentinels
/// written by a forced completion; they never score as correct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Answer {
    Single(Option<usize>),
    Multiple(BTreeSet<usize>),
}

impl Answer {
    /// Single-choice answer from a raw selection index (`-1` means unselected).
    #[must_use]
    pub fn from_index(index: i64) -> Self {
        Self::Single(usize::try_from(index).ok())
    }

    #[must_use]
    pub fn single(index: usize) -> Self {
        Self::Single(Some(index))
    }

    #[must_use]
    pub fn multiple(indices: impl IntoIterator<Item = usize>) -> Self {
        Self::Multiple(indices.into_iter().collect())
    }

    /// The sentinel stored for a question that was never answered.
    #[must_use]
    pub fn unanswered(kind: ChoiceKind) -> Self {
        match kind {
            ChoiceKind::Single => Self::Single(None),
            ChoiceKind::Multiple => Self::Multiple(BTreeSet::new()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ChoiceKind {
        match self {
            Self::Single(_) => ChoiceKind::Single,
            Self::Multiple(_) => ChoiceKind::Multiple,
        }
    }

    #[must_use]
    pub fn is_unanswered(&self) -> bool {
        match self {
            Self::Single(choice) => choice.is_none(),
            Self::Multiple(set) => set.is_empty(),
        }
    }

    /// Selected indices, whatever the arity.
    #[must_use]
    pub fn selected(&self) -> BTreeSet<usize> {
        match self {
            Self::Single(choice) => choice.iter().copied().collect(),
            Self::Multiple(set) => set.clone(),
        }
    }

    /// First selected index that does not exist in `question`, if any.
    #[must_use]
    pub fn out_of_range(&self, question: &Question) -> Option<usize> {
        let len = question.option_count();
        match self {
            Self::Single(choice) => choice.filter(|&i| i >= len),
            Self::Multiple(set) => set.iter().copied().find(|&i| i >= len),
        }
    }
}
