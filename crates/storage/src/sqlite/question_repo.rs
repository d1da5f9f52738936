use quiz_core::model::{Question, TestId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{
    decode_correct_options, encode_correct_options, id_i64, question_id_from_i64, read_err, ser,
    u32_from_i64, write_err,
};
use crate::repository::{QuestionRepository, StorageError};

/// Question columns plus its options, accumulated while walking the joined rows.
struct PendingQuestion {
    id: i64,
    position: u32,
    text: String,
    correct_options: String,
    options: Vec<String>,
}

impl PendingQuestion {
    fn into_question(self) -> Result<Question, StorageError> {
        let correct = decode_correct_options(&self.correct_options)?;
        Question::new(
            question_id_from_i64(self.id)?,
            self.position,
            self.text,
            self.options,
            correct,
        )
        .map_err(ser)
    }
}

#[async_trait::async_trait]
impl QuestionRepository for SqliteRepository {
    async fn upsert_question(
        &self,
        test_id: TestId,
        question: &Question,
    ) -> Result<(), StorageError> {
        let question_id = id_i64("question_id", question.id().value())?;
        let correct = encode_correct_options(question.correct_options())?;

        let mut tx = self.pool.begin().await.map_err(read_err)?;

        sqlx::query(
            r"
            INSERT INTO questions (id, test_id, position, text, correct_options)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                test_id = excluded.test_id,
                position = excluded.position,
                text = excluded.text,
                correct_options = excluded.correct_options
            ",
        )
        .bind(question_id)
        .bind(id_i64("test_id", test_id.value())?)
        .bind(i64::from(question.position()))
        .bind(question.text())
        .bind(correct)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        sqlx::query("DELETE FROM question_options WHERE question_id = ?1")
            .bind(question_id)
            .execute(&mut *tx)
            .await
            .map_err(write_err)?;

        for (idx, text) in question.options().iter().enumerate() {
            let idx = i64::try_from(idx)
                .map_err(|_| StorageError::Serialization("option index overflow".into()))?;
            sqlx::query(
                r"
                INSERT INTO question_options (question_id, idx, text)
                VALUES (?1, ?2, ?3)
                ",
            )
            .bind(question_id)
            .bind(idx)
            .bind(text.as_str())
            .execute(&mut *tx)
            .await
            .map_err(write_err)?;
        }

        tx.commit().await.map_err(write_err)?;
        Ok(())
    }

    async fn questions_for_test(&self, test_id: TestId) -> Result<Vec<Question>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT q.id, q.position, q.text, q.correct_options, o.text AS option_text
            FROM questions q
            LEFT JOIN question_options o ON o.question_id = q.id
            WHERE q.test_id = ?1
            ORDER BY q.position ASC, o.idx ASC
            ",
        )
        .bind(id_i64("test_id", test_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(read_err)?;

        let mut pending: Vec<PendingQuestion> = Vec::new();
        for row in &rows {
            let id: i64 = row.try_get("id").map_err(ser)?;
            let option: Option<String> = row.try_get("option_text").map_err(ser)?;

            match pending.last_mut() {
                Some(current) if current.id == id => current.options.extend(option),
                _ => pending.push(PendingQuestion {
                    id,
                    position: u32_from_i64(
                        "position",
                        row.try_get::<i64, _>("position").map_err(ser)?,
                    )?,
                    text: row.try_get("text").map_err(ser)?,
                    correct_options: row.try_get("correct_options").map_err(ser)?,
                    options: option.into_iter().collect(),
                }),
            }
        }

        pending
            .into_iter()
            .map(PendingQuestion::into_question)
            .collect()
    }
}
