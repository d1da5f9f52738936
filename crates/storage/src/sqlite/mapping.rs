use quiz_core::model::{QuestionId, TestId, TestResult, UserId};
use serde::Deserialize;
use sqlx::Row;

use crate::repository::{ResultRow, StorageError};

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Maps a write error, turning constraint violations into domain storage errors.
pub(crate) fn write_err(e: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StorageError::Conflict;
        }
        if db.is_foreign_key_violation() {
            return StorageError::NotFound;
        }
    }
    StorageError::Connection(e.to_string())
}

pub(crate) fn read_err(e: sqlx::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn test_id_from_i64(v: i64) -> Result<TestId, StorageError> {
    Ok(TestId::new(i64_to_u64("test_id", v)?))
}

pub(crate) fn user_id_from_i64(v: i64) -> Result<UserId, StorageError> {
    Ok(UserId::new(i64_to_u64("user_id", v)?))
}

pub(crate) fn question_id_from_i64(v: i64) -> Result<QuestionId, StorageError> {
    Ok(QuestionId::new(i64_to_u64("question_id", v)?))
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

/// Stored shapes of the correct-option column.
///
/// Current rows hold a JSON array; rows written by the single-answer schema
/// hold a bare index, which decodes to a singleton set.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredCorrectOptions {
    Many(Vec<usize>),
    One(usize),
}

pub(crate) fn encode_correct_options<'a>(
    indices: impl IntoIterator<Item = &'a usize>,
) -> Result<String, StorageError> {
    let indices: Vec<usize> = indices.into_iter().copied().collect();
    serde_json::to_string(&indices).map_err(ser)
}

/// Decodes the correct-option column, accepting JSON and comma-separated lists.
pub(crate) fn decode_correct_options(raw: &str) -> Result<Vec<usize>, StorageError> {
    match serde_json::from_str::<StoredCorrectOptions>(raw) {
        Ok(StoredCorrectOptions::Many(list)) => Ok(list),
        Ok(StoredCorrectOptions::One(index)) => Ok(vec![index]),
        Err(json_err) => raw
            .split(',')
            .map(|part| part.trim().parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| {
                StorageError::Serialization(format!("invalid correct_options {raw:?}: {json_err}"))
            }),
    }
}

pub(crate) fn map_result_row(row: &sqlx::sqlite::SqliteRow) -> Result<ResultRow, StorageError> {
    let id: i64 = row.try_get("id").map_err(ser)?;
    Ok(ResultRow::new(id, map_result(row)?))
}

pub(crate) fn map_result(row: &sqlx::sqlite::SqliteRow) -> Result<TestResult, StorageError> {
    let elapsed_seconds = row
        .try_get::<Option<i64>, _>("elapsed_seconds")
        .map_err(ser)?
        .map(|v| u32_from_i64("elapsed_seconds", v))
        .transpose()?;

    TestResult::from_persisted(
        user_id_from_i64(row.try_get::<i64, _>("user_id").map_err(ser)?)?,
        test_id_from_i64(row.try_get::<i64, _>("test_id").map_err(ser)?)?,
        row.try_get::<i64, _>("score_percent").map_err(ser)?,
        row.try_get("recorded_at").map_err(ser)?,
        elapsed_seconds,
    )
    .map_err(ser)
}
