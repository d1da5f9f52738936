use quiz_core::model::{Test, TestId};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::mapping::{id_i64, read_err, ser, test_id_from_i64, u32_from_i64, write_err};
use crate::repository::{StorageError, TestRepository};

#[async_trait::async_trait]
impl TestRepository for SqliteRepository {
    async fn upsert_test(&self, test: &Test) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO tests (id, name, timer_seconds)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                timer_seconds = excluded.timer_seconds
            ",
        )
        .bind(id_i64("test_id", test.id().value())?)
        .bind(test.name())
        .bind(test.timer_seconds().map(i64::from))
        .execute(&self.pool)
        .await
        .map_err(write_err)?;

        Ok(())
    }

    async fn get_test(&self, id: TestId) -> Result<Option<Test>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, name, timer_seconds
            FROM tests WHERE id = ?1
            ",
        )
        .bind(id_i64("test_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(read_err)?;

        row.as_ref().map(test_from_row).transpose()
    }

    async fn list_tests(&self, limit: u32) -> Result<Vec<Test>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, name, timer_seconds
            FROM tests
            ORDER BY id ASC
            LIMIT ?1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(read_err)?;

        rows.iter().map(test_from_row).collect()
    }
}

fn test_from_row(row: &SqliteRow) -> Result<Test, StorageError> {
    let timer_seconds = row
        .try_get::<Option<i64>, _>("timer_seconds")
        .map_err(ser)?
        .map(|v| u32_from_i64("timer_seconds", v))
        .transpose()?;

    Test::new(
        test_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?,
        row.try_get::<String, _>("name").map_err(ser)?,
        timer_seconds,
    )
    .map_err(ser)
}
