use std::sync::Arc;

use quiz_core::model::{Answer, TestId, UserId};
use storage::repository::{QuestionRepository, ResultId, ResultRepository, TestRepository};
use tracing::{debug, info, warn};

use super::recorder::ResultRecorder;
use super::service::{SessionCompletion, SessionState, Step, TestSession};
use crate::Clock;
use crate::error::SessionError;

/// Result of answering the current question in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAnswerResult {
    pub step: Step,
    /// Set once the last answer was accepted and the result row was written.
    pub completion: Option<SessionCompletion>,
}

/// Orchestrates session start, answering, and result recording.
#[derive(Clone)]
pub struct SessionLoopService {
    clock: Clock,
    tests: Arc<dyn TestRepository>,
    questions: Arc<dyn QuestionRepository>,
    recorder: ResultRecorder,
}

impl SessionLoopService {
    #[must_use]
    pub fn new(
        clock: Clock,
        tests: Arc<dyn TestRepository>,
        questions: Arc<dyn QuestionRepository>,
        results: Arc<dyn ResultRepository>,
    ) -> Self {
        Self {
            clock,
            tests,
            questions,
            recorder: ResultRecorder::new(results),
        }
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Start a session for `user_id` on `test_id`.
    ///
    /// The question bank is read once here; later edits do not reach the session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::TestNotFound` for an unknown test,
    /// `SessionError::EmptyTest` when it has no questions, and
    /// `SessionError::Storage` on read failures.
    pub async fn start_session(
        &self,
        user_id: UserId,
        test_id: TestId,
    ) -> Result<TestSession, SessionError> {
        let test = self
            .tests
            .get_test(test_id)
            .await?
            .ok_or(SessionError::TestNotFound(test_id))?;
        let questions = self.questions.questions_for_test(test_id).await?;

        let mut session = TestSession::for_test(user_id, &test, questions)?;
        session.start(self.clock.now())?;

        info!(
            session_id = %session.id(),
            user_id = %user_id,
            test_id = %test_id,
            questions = session.questions().len(),
            timer_seconds = ?test.timer_seconds(),
            "test session started"
        );
        Ok(session)
    }

    /// Answer the current question; records the result after the last one.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`TestSession::record_and_advance`] with the
    /// session unchanged, or `SessionError::Storage` if the result write failed.
    /// In the latter case the session stays `Finishing` and
    /// [`SessionLoopService::retry_record`] may be used.
    pub async fn answer_current(
        &self,
        session: &mut TestSession,
        answer: Answer,
    ) -> Result<SessionAnswerResult, SessionError> {
        let step = session
            .record_and_advance(answer, self.clock.now())
            .inspect_err(|err| log_rejected(session, err))?;

        let completion = match step {
            Step::Advanced { .. } => None,
            Step::Finishing => Some(self.complete(session).await?),
        };
        Ok(SessionAnswerResult { step, completion })
    }

    /// Answer the last question and record the result.
    ///
    /// # Errors
    ///
    /// See [`TestSession::finish`]; storage failures as in
    /// [`SessionLoopService::answer_current`].
    pub async fn finish(
        &self,
        session: &mut TestSession,
        answer: Answer,
    ) -> Result<SessionCompletion, SessionError> {
        let finished = session.finish(answer, self.clock.now()).map(|_| ());
        finished.inspect_err(|err| log_rejected(session, err))?;
        self.complete(session).await
    }

    /// Complete a timed session whose clock ran out and record the result.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the session is not a timed, in-progress one,
    /// or `SessionError::Storage` if the result write failed.
    pub async fn force_timeout_finish(
        &self,
        session: &mut TestSession,
    ) -> Result<SessionCompletion, SessionError> {
        let answered = session.answers().len();
        session.force_timeout_finish(self.clock.now())?;
        warn!(
            session_id = %session.id(),
            answered,
            total = session.questions().len(),
            "session timer expired, finishing"
        );
        self.complete(session).await
    }

    /// Retry the result write of a session left `Finishing` by a failed write.
    ///
    /// Returns the existing completion unchanged for an already recorded session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for sessions that never reached `Finishing`,
    /// or `SessionError::Storage` if persistence fails again.
    pub async fn retry_record(
        &self,
        session: &mut TestSession,
    ) -> Result<SessionCompletion, SessionError> {
        if let (SessionState::Completed, Some(id), Some(result)) =
            (session.state(), session.result_id(), session.result())
        {
            return Ok(SessionCompletion {
                result_id: id,
                score_percent: result.score_percent(),
                elapsed_seconds: result.elapsed_seconds(),
                timed_out: session.timed_out(),
            });
        }
        self.complete(session).await
    }

    async fn complete(&self, session: &mut TestSession) -> Result<SessionCompletion, SessionError> {
        let result = session
            .result()
            .cloned()
            .ok_or(SessionError::InvalidState {
                operation: "record a result",
                state: session.state(),
            })?;
        let result_id: ResultId = self.recorder.record(&result).await?;
        let completion = session.mark_recorded(result_id)?;

        info!(
            session_id = %session.id(),
            result_id,
            score_percent = completion.score_percent,
            timed_out = completion.timed_out,
            "test session completed"
        );
        Ok(completion)
    }
}

fn log_rejected(session: &TestSession, err: &SessionError) {
    if err.is_recoverable() {
        debug!(
            session_id = %session.id(),
            index = session.current_index(),
            error = %err,
            "answer rejected"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::model::{Question, QuestionId, Test};
    use quiz_core::time::fixed_now;
    use storage::repository::Storage;

    async fn seeded(timer: Option<u32>) -> (Storage, SessionLoopService) {
        let storage = Storage::in_memory();
        let test = Test::new(TestId::new(1), "Capitals", timer).unwrap();
        storage.tests.upsert_test(&test).await.unwrap();
        for (pos, correct) in [(1_u32, 1_usize), (2, 0), (3, 2)] {
            let question = Question::with_single_correct(
                QuestionId::new(u64::from(pos)),
                pos,
                format!("Question {pos}"),
                vec!["a".into(), "b".into(), "c".into()],
                correct,
            )
            .unwrap();
            storage.questions.upsert_question(test.id(), &question).await.unwrap();
        }
        let service = SessionLoopService::new(
            Clock::fixed(fixed_now()),
            storage.tests.clone(),
            storage.questions.clone(),
            storage.results.clone(),
        );
        (storage, service)
    }

    #[tokio::test]
    async fn unknown_and_empty_tests_cannot_start() {
        let (storage, service) = seeded(None).await;
        let err = service
            .start_session(UserId::new(1), TestId::new(99))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::TestNotFound(id) if id == TestId::new(99)));

        let empty = Test::new(TestId::new(2), "Empty", None).unwrap();
        storage.tests.upsert_test(&empty).await.unwrap();
        let err = service
            .start_session(UserId::new(1), empty.id())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::EmptyTest));
    }

    #[tokio::test]
    async fn last_answer_records_exactly_once() {
        let (storage, service) = seeded(None).await;
        let user = UserId::new(4);
        let mut session = service.start_session(user, TestId::new(1)).await.unwrap();

        for index in [1, 0] {
            let outcome = service
                .answer_current(&mut session, Answer::single(index))
                .await
                .unwrap();
            assert!(outcome.completion.is_none());
        }
        let outcome = service
            .answer_current(&mut session, Answer::single(0))
            .await
            .unwrap();
        assert_eq!(outcome.step, Step::Finishing);
        let completion = outcome.completion.unwrap();
        assert_eq!(completion.score_percent, 67);
        assert_eq!(completion.elapsed_seconds, Some(0));
        assert_eq!(session.state(), SessionState::Completed);

        // Retrying a recorded session does not write again.
        let again = service.retry_record(&mut session).await.unwrap();
        assert_eq!(again, completion);
        let rows = storage.results.list_results_for_user(user, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, completion.result_id);
    }

    #[tokio::test]
    async fn retry_before_finishing_is_invalid() {
        let (_storage, service) = seeded(None).await;
        let mut session = service
            .start_session(UserId::new(1), TestId::new(1))
            .await
            .unwrap();
        let err = service.retry_record(&mut session).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                state: SessionState::InProgress,
                ..
            }
        ));
    }
}
