//! Shared error types for the services crate.

use thiserror::Error;

use quiz_core::model::{ChoiceKind, ResultError, TestId};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

use crate::sessions::SessionState;

/// Errors emitted by session services.
///
/// `NoAnswerSelected`, `AnswerKindMismatch` and `OptionOutOfRange` are
/// recoverable: the session is left untouched and the student can be
/// re-prompted. `InvalidState` means the caller drove the session wrongly.
/// `Storage` on completion means the result was not recorded.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("test has no questions")]
    EmptyTest,
    #[error("test {0} not found")]
    TestNotFound(TestId),
    #[error("no answer selected")]
    NoAnswerSelected,
    #[error("expected a {expected:?}-choice answer, got {got:?}")]
    AnswerKindMismatch { expected: ChoiceKind, got: ChoiceKind },
    #[error("option {index} does not exist (question has {len} options)")]
    OptionOutOfRange { index: usize, len: usize },
    #[error("cannot {operation} while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error(transparent)]
    Result(#[from] ResultError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SessionError {
    /// True for answer validation failures that leave the session unchanged.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoAnswerSelected | Self::AnswerKindMismatch { .. } | Self::OptionOutOfRange { .. }
        )
    }
}

/// Errors emitted by journal queries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JournalError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
