use std::sync::Arc;

use quiz_core::model::TestResult;
use storage::repository::{ResultId, ResultRepository, StorageError};
use tracing::{error, info};

/// Persists exactly one result row per call.
///
/// There is no retry here: a failed write is returned to the caller so a lost
/// result is never silent.
#[derive(Clone)]
pub struct ResultRecorder {
    results: Arc<dyn ResultRepository>,
}

impl ResultRecorder {
    #[must_use]
    pub fn new(results: Arc<dyn ResultRepository>) -> Self {
        Self { results }
    }

    /// Append `result` to the result store.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the single insert attempt.
    pub async fn record(&self, result: &TestResult) -> Result<ResultId, StorageError> {
        match self.results.append_result(result).await {
            Ok(id) => {
                info!(
                    result_id = id,
                    user_id = %result.user_id(),
                    test_id = %result.test_id(),
                    score_percent = result.score_percent(),
                    elapsed_seconds = ?result.elapsed_seconds(),
                    "test result recorded"
                );
                Ok(id)
            }
            Err(err) => {
                error!(
                    user_id = %result.user_id(),
                    test_id = %result.test_id(),
                    error = %err,
                    "failed to record test result"
                );
                Err(err)
            }
        }
    }
}
