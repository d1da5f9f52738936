use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use quiz_core::model::{Mark, Test, TestId, UserId};
use storage::repository::{ResultId, ResultRepository, ResultRow, TestRepository};

use crate::error::JournalError;

/// Upper bound on tests scanned by [`ResultJournalService::available_tests`].
///
/// Tests past this many (in repository order) are not listed.
pub const TEST_SCAN_LIMIT: u32 = 1_000;

/// Presentation-agnostic journal line for a recorded result.
///
/// Timestamps and durations stay raw; the front-end formats them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    pub result_id: ResultId,
    pub test_id: TestId,
    /// `None` when the store holding the results has no matching test row,
    /// e.g. an in-memory store seeded with results only.
    pub test_name: Option<String>,
    pub score_percent: u8,
    pub mark: Mark,
    pub recorded_at: DateTime<Utc>,
    pub timer_seconds: Option<u32>,
    pub elapsed_seconds: Option<u32>,
}

impl JournalEntry {
    #[must_use]
    pub fn from_row(row: &ResultRow, test: Option<&Test>) -> Self {
        let result = &row.result;
        Self {
            result_id: row.id,
            test_id: result.test_id(),
            test_name: test.map(|t| t.name().to_owned()),
            score_percent: result.score_percent(),
            mark: result.mark(),
            recorded_at: result.recorded_at(),
            timer_seconds: test.and_then(Test::timer_seconds),
            elapsed_seconds: result.elapsed_seconds(),
        }
    }
}

/// Journal lines together with the average mark across them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalSummary {
    pub entries: Vec<JournalEntry>,
    pub average_mark: f64,
}

impl JournalSummary {
    #[must_use]
    pub fn new(entries: Vec<JournalEntry>) -> Self {
        let average_mark = average_mark(&entries);
        Self {
            entries,
            average_mark,
        }
    }
}

/// Mean mark of `entries` rounded to two decimals; `0.0` when there are none.
#[must_use]
pub fn average_mark(entries: &[JournalEntry]) -> f64 {
    if entries.is_empty() {
        return 0.0;
    }
    let total: u32 = entries.iter().map(|e| u32::from(e.mark.value())).sum();
    #[allow(clippy::cast_precision_loss)]
    let mean = f64::from(total) / entries.len() as f64;
    (mean * 100.0).round() / 100.0
}

/// Read-side queries over recorded results.
#[derive(Clone)]
pub struct ResultJournalService {
    tests: Arc<dyn TestRepository>,
    results: Arc<dyn ResultRepository>,
}

impl ResultJournalService {
    #[must_use]
    pub fn new(tests: Arc<dyn TestRepository>, results: Arc<dyn ResultRepository>) -> Self {
        Self { tests, results }
    }

    /// Results of `user_id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns `JournalError::Storage` if a repository query fails.
    pub async fn journal(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<JournalEntry>, JournalError> {
        let rows = self.results.list_results_for_user(user_id, limit).await?;
        self.entries(&rows).await
    }

    /// Like [`ResultJournalService::journal`], with the average mark of the
    /// listed results.
    ///
    /// # Errors
    ///
    /// Returns `JournalError::Storage` if a repository query fails.
    pub async fn summary(&self, user_id: UserId, limit: u32) -> Result<JournalSummary, JournalError> {
        Ok(JournalSummary::new(self.journal(user_id, limit).await?))
    }

    /// Results recorded for `test_id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns `JournalError::Storage` if a repository query fails.
    pub async fn test_results(
        &self,
        test_id: TestId,
        limit: u32,
    ) -> Result<Vec<JournalEntry>, JournalError> {
        let rows = self.results.list_results_for_test(test_id, limit).await?;
        self.entries(&rows).await
    }

    /// Tests `user_id` has no recorded result for yet, among the first
    /// [`TEST_SCAN_LIMIT`] tests.
    ///
    /// # Errors
    ///
    /// Returns `JournalError::Storage` if a repository query fails.
    pub async fn available_tests(&self, user_id: UserId) -> Result<Vec<Test>, JournalError> {
        let taken: HashSet<TestId> = self
            .results
            .list_results_for_user(user_id, u32::MAX)
            .await?
            .iter()
            .map(|row| row.result.test_id())
            .collect();

        let tests = self.tests.list_tests(TEST_SCAN_LIMIT).await?;
        Ok(tests
            .into_iter()
            .filter(|test| !taken.contains(&test.id()))
            .collect())
    }

    async fn entries(&self, rows: &[ResultRow]) -> Result<Vec<JournalEntry>, JournalError> {
        let mut tests: HashMap<TestId, Option<Test>> = HashMap::new();
        for row in rows {
            let id = row.result.test_id();
            if !tests.contains_key(&id) {
                let test = self.tests.get_test(id).await?;
                tests.insert(id, test);
            }
        }

        Ok(rows
            .iter()
            .map(|row| {
                let test = tests.get(&row.result.test_id()).and_then(Option::as_ref);
                JournalEntry::from_row(row, test)
            })
            .collect())
    }
}
