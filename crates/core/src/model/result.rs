use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{TestId, UserId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ResultError {
    #[error("score percent must be within 0..=100, got {0}")]
    ScoreOutOfRange(i64),
}

/// Durable record of one completed test session.
///
/// Results are append-only: once recorded they are never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    user_id: UserId,
    test_id: TestId,
    score_percent: u8,
    recorded_at: DateTime<Utc>,
    elapsed_seconds: Option<u32>,
}

impl TestResult {
    /// # Errors
    ///
    /// Returns `ResultError::ScoreOutOfRange` if `score_percent > 100`.
    pub fn new(
        user_id: UserId,
        test_id: TestId,
        score_percent: u8,
        recorded_at: DateTime<Utc>,
        elapsed_seconds: Option<u32>,
    ) -> Result<Self, ResultError> {
        Self::from_persisted(
            user_id,
            test_id,
            i64::from(score_percent),
            recorded_at,
            elapsed_seconds,
        )
    }

    /// Rehydrate a result from persisted storage, where the score is a plain integer.
    ///
    /// # Errors
    ///
    /// Returns `ResultError::ScoreOutOfRange` if the stored score is outside `0..=100`.
    pub fn from_persisted(
        user_id: UserId,
        test_id: TestId,
        score_percent: i64,
        recorded_at: DateTime<Utc>,
        elapsed_seconds: Option<u32>,
    ) -> Result<Self, ResultError> {
        let score = u8::try_from(score_percent)
            .ok()
            .filter(|s| *s <= 100)
            .ok_or(ResultError::ScoreOutOfRange(score_percent))?;

        Ok(Self {
            user_id,
            test_id,
            score_percent: score,
            recorded_at,
            elapsed_seconds,
        })
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn test_id(&self) -> TestId {
        self.test_id
    }

    #[must_use]
    pub fn score_percent(&self) -> u8 {
        self.score_percent
    }

    #[must_use]
    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    #[must_use]
    pub fn elapsed_seconds(&self) -> Option<u32> {
        self.elapsed_seconds
    }

    #[must_use]
    pub fn mark(&self) -> Mark {
        Mark::from_percent(self.score_percent)
    }
}

/// School mark on a 1..=5 scale derived from the score percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Mark(u8);

impl Mark {
    #[must_use]
    pub fn from_percent(percent: u8) -> Self {
        let mark = match percent {
            90.. => 5,
            70..=89 => 4,
            50..=69 => 3,
            30..=49 => 2,
            _ => 1,
        };
        Self(mark)
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn rejects_score_above_hundred() {
        let err = TestResult::from_persisted(UserId::new(1), TestId::new(1), 101, fixed_now(), None)
            .unwrap_err();
        assert_eq!(err, ResultError::ScoreOutOfRange(101));

        let err = TestResult::from_persisted(UserId::new(1), TestId::new(1), -1, fixed_now(), None)
            .unwrap_err();
        assert_eq!(err, ResultError::ScoreOutOfRange(-1));
    }

    #[test]
    fn mark_thresholds() {
        assert_eq!(Mark::from_percent(100).value(), 5);
        assert_eq!(Mark::from_percent(90).value(), 5);
        assert_eq!(Mark::from_percent(89).value(), 4);
        assert_eq!(Mark::from_percent(70).value(), 4);
        assert_eq!(Mark::from_percent(50).value(), 3);
        assert_eq!(Mark::from_percent(30).value(), 2);
        assert_eq!(Mark::from_percent(29).value(), 1);
        assert_eq!(Mark::from_percent(0).value(), 1);
    }

    #[test]
    fn result_exposes_mark() {
        let result =
            TestResult::new(UserId::new(3), TestId::new(4), 67, fixed_now(), Some(42)).unwrap();
        assert_eq!(result.mark().value(), 3);
        assert_eq!(result.elapsed_seconds(), Some(42));
    }
}
