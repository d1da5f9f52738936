use quiz_core::model::{TestId, TestResult, UserId};

use super::SqliteRepository;
use super::mapping::{id_i64, map_result, map_result_row, read_err, write_err};
use crate::repository::{ResultId, ResultRepository, ResultRow, StorageError};

#[async_trait::async_trait]
impl ResultRepository for SqliteRepository {
    async fn append_result(&self, result: &TestResult) -> Result<ResultId, StorageError> {
        let res = sqlx::query(
            r"
                INSERT INTO test_results (
                    user_id, test_id, score_percent, recorded_at, elapsed_seconds
                )
                VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(id_i64("user_id", result.user_id().value())?)
        .bind(id_i64("test_id", result.test_id().value())?)
        .bind(i64::from(result.score_percent()))
        .bind(result.recorded_at())
        .bind(result.elapsed_seconds().map(i64::from))
        .execute(&self.pool)
        .await
        .map_err(write_err)?;

        Ok(res.last_insert_rowid())
    }

    async fn get_result(&self, id: ResultId) -> Result<TestResult, StorageError> {
        let row = sqlx::query(
            r"
                SELECT user_id, test_id, score_percent, recorded_at, elapsed_seconds
                FROM test_results
                WHERE id = ?1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(read_err)?
        .ok_or(StorageError::NotFound)?;

        map_result(&row)
    }

    async fn list_results_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<ResultRow>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT id, user_id, test_id, score_percent, recorded_at, elapsed_seconds
                FROM test_results
                WHERE user_id = ?1
                ORDER BY recorded_at DESC, id DESC
                LIMIT ?2
            ",
        )
        .bind(id_i64("user_id", user_id.value())?)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(read_err)?;

        rows.iter().map(map_result_row).collect()
    }

    async fn list_results_for_test(
        &self,
        test_id: TestId,
        limit: u32,
    ) -> Result<Vec<ResultRow>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT id, user_id, test_id, score_percent, recorded_at, elapsed_seconds
                FROM test_results
                WHERE test_id = ?1
                ORDER BY recorded_at DESC, id DESC
                LIMIT ?2
            ",
        )
        .bind(id_i64("test_id", test_id.value())?)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(read_err)?;

        rows.iter().map(map_result_row).collect()
    }
}
