use async_trait::async_trait;
use quiz_core::model::{Question, Test, TestId, TestResult, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Storage identifier for a persisted result (`SQLite` row id).
pub type ResultId = i64;

/// A persisted result together with its storage id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRow {
    pub id: ResultId,
    pub result: TestResult,
}

impl ResultRow {
    #[must_use]
    pub fn new(id: ResultId, result: TestResult) -> Self {
        Self { id, result }
    }
}

/// Repository contract for tests (themes).
#[async_trait]
pub trait TestRepository: Send + Sync {
    /// Persist or update a test.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if another test already uses the name.
    async fn upsert_test(&self, test: &Test) -> Result<(), StorageError>;

    /// Fetch a test by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_test(&self, id: TestId) -> Result<Option<Test>, StorageError>;

    /// List tests ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_tests(&self, limit: u32) -> Result<Vec<Test>, StorageError>;
}

/// The question bank: questions of a test in position order.
#[async_trait]
pub trait QuestionRepository: Send + Sync {
    /// Persist or update a question of `test_id`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the test does not exist and
    /// `StorageError::Conflict` if another question holds the same position.
    async fn upsert_question(&self, test_id: TestId, question: &Question)
    -> Result<(), StorageError>;

    /// Fetch all questions of a test ordered by position.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures or undecodable rows.
    async fn questions_for_test(&self, test_id: TestId) -> Result<Vec<Question>, StorageError>;
}

/// Append-only result store.
#[async_trait]
pub trait ResultRepository: Send + Sync {
    /// Insert a new result row and return its id. Never updates existing rows.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    async fn append_result(&self, result: &TestResult) -> Result<ResultId, StorageError>;

    /// Fetch a result by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing.
    async fn get_result(&self, id: ResultId) -> Result<TestResult, StorageError>;

    /// Results of one user, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_results_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<ResultRow>, StorageError>;

    /// Results recorded for one test, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_results_for_test(
        &self,
        test_id: TestId,
        limit: u32,
    ) -> Result<Vec<ResultRow>, StorageError>;
}

fn sort_newest_first(rows: &mut [ResultRow]) {
    rows.sort_by(|a, b| {
        b.result
            .recorded_at()
            .cmp(&a.result.recorded_at())
            .then(b.id.cmp(&a.id))
    });
}

fn limit_usize(limit: u32) -> usize {
    usize::try_from(limit).unwrap_or(usize::MAX)
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    tests: Arc<Mutex<HashMap<TestId, Test>>>,
    questions: Arc<Mutex<HashMap<TestId, Vec<Question>>>>,
    results: Arc<Mutex<Vec<ResultRow>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TestRepository for InMemoryRepository {
    async fn upsert_test(&self, test: &Test) -> Result<(), StorageError> {
        let mut guard = self
            .tests
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if guard
            .values()
            .any(|t| t.id() != test.id() && t.name() == test.name())
        {
            return Err(StorageError::Conflict);
        }
        guard.insert(test.id(), test.clone());
        Ok(())
    }

    async fn get_test(&self, id: TestId) -> Result<Option<Test>, StorageError> {
        let guard = self
            .tests
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&id).cloned())
    }

    async fn list_tests(&self, limit: u32) -> Result<Vec<Test>, StorageError> {
        let guard = self
            .tests
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut tests: Vec<Test> = guard.values().cloned().collect();
        tests.sort_by_key(Test::id);
        tests.truncate(limit_usize(limit));
        Ok(tests)
    }
}

#[async_trait]
impl QuestionRepository for InMemoryRepository {
    async fn upsert_question(
        &self,
        test_id: TestId,
        question: &Question,
    ) -> Result<(), StorageError> {
        let known_test = self
            .tests
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .contains_key(&test_id);
        if !known_test {
            return Err(StorageError::NotFound);
        }

        let mut guard = self
            .questions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let bank = guard.entry(test_id).or_default();
        if bank
            .iter()
            .any(|q| q.id() != question.id() && q.position() == question.position())
        {
            return Err(StorageError::Conflict);
        }
        bank.retain(|q| q.id() != question.id());
        bank.push(question.clone());
        bank.sort_by_key(Question::position);
        Ok(())
    }

    async fn questions_for_test(&self, test_id: TestId) -> Result<Vec<Question>, StorageError> {
        let guard = self
            .questions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&test_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ResultRepository for InMemoryRepository {
    async fn append_result(&self, result: &TestResult) -> Result<ResultId, StorageError> {
        let mut guard = self
            .results
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let id = i64::try_from(guard.len())
            .map_err(|_| StorageError::Serialization("result id overflow".into()))?
            + 1;
        guard.push(ResultRow::new(id, result.clone()));
        Ok(id)
    }

    async fn get_result(&self, id: ResultId) -> Result<TestResult, StorageError> {
        let guard = self
            .results
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard
            .iter()
            .find(|row| row.id == id)
            .map(|row| row.result.clone())
            .ok_or(StorageError::NotFound)
    }

    async fn list_results_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<ResultRow>, StorageError> {
        let guard = self
            .results
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut rows: Vec<ResultRow> = guard
            .iter()
            .filter(|row| row.result.user_id() == user_id)
            .cloned()
            .collect();
        sort_newest_first(&mut rows);
        rows.truncate(limit_usize(limit));
        Ok(rows)
    }

    async fn list_results_for_test(
        &self,
        test_id: TestId,
        limit: u32,
    ) -> Result<Vec<ResultRow>, StorageError> {
        let guard = self
            .results
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut rows: Vec<ResultRow> = guard
            .iter()
            .filter(|row| row.result.test_id() == test_id)
            .cloned()
            .collect();
        sort_newest_first(&mut rows);
        rows.truncate(limit_usize(limit));
        Ok(rows)
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub tests: Arc<dyn TestRepository>,
    pub questions: Arc<dyn QuestionRepository>,
    pub results: Arc<dyn ResultRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        Self {
            tests: Arc::new(repo.clone()),
            questions: Arc::new(repo.clone()),
            results: Arc::new(repo),
        }
    }
}
