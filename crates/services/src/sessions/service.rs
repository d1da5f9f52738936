use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use quiz_core::model::{Answer, Question, SessionId, Test, TestId, TestResult, UserId};
use quiz_core::scoring;
use quiz_core::time::whole_seconds_between;
use storage::repository::ResultId;

use super::progress::SessionProgress;
use super::timer::{Countdown, TickOutcome};
use crate::error::SessionError;

//
// ─── STATE ─────────────────────────────────────────────────────────────────────
//

/// Lifecycle of a test session. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    NotStarted,
    InProgress,
    /// Every position holds an answer and the result is computed but not yet recorded.
    Finishing,
    Completed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotStarted => "not started",
            Self::InProgress => "in progress",
            Self::Finishing => "finishing",
            Self::Completed => "completed",
        };
        f.write_str(label)
    }
}

/// What happened to the session after an accepted answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The answer was stored and the next position is now current.
    Advanced { next_index: usize },
    /// The last position was answered; the result awaits recording.
    Finishing,
}

/// Payload handed to the presentation layer once a result is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionCompletion {
    pub result_id: ResultId,
    pub score_percent: u8,
    pub elapsed_seconds: Option<u32>,
    pub timed_out: bool,
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// One student's attempt at a test.
///
/// Holds a snapshot of the question bank and the answer ledger. Positions are
/// visited strictly in order; the only way back is a single step to the last
/// answered position, whose ledger entry is then replaced when re-answered.
/// Every rejected operation leaves the session untouched.
#[derive(Debug, Clone)]
pub struct TestSession {
    id: SessionId,
    user_id: UserId,
    test_id: TestId,
    questions: Vec<Question>,
    answers: Vec<Answer>,
    current: usize,
    state: SessionState,
    started_at: Option<DateTime<Utc>>,
    countdown: Option<Countdown>,
    timed_out: bool,
    result: Option<TestResult>,
    result_id: Option<ResultId>,
}

impl TestSession {
    /// Create a session that has not started yet.
    ///
    /// A `timer_seconds` of `None` or `Some(0)` makes the session untimed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::EmptyTest` if `questions` is empty.
    pub fn new(
        user_id: UserId,
        test_id: TestId,
        questions: Vec<Question>,
        timer_seconds: Option<u32>,
    ) -> Result<Self, SessionError> {
        if questions.is_empty() {
            return Err(SessionError::EmptyTest);
        }

        Ok(Self {
            id: SessionId::random(),
            user_id,
            test_id,
            questions,
            answers: Vec::new(),
            current: 0,
            state: SessionState::NotStarted,
            started_at: None,
            countdown: timer_seconds.and_then(Countdown::new),
            timed_out: false,
            result: None,
            result_id: None,
        })
    }

    /// Create a session for `test` using its time limit.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::EmptyTest` if `questions` is empty.
    pub fn for_test(
        user_id: UserId,
        test: &Test,
        questions: Vec<Question>,
    ) -> Result<Self, SessionError> {
        Self::new(user_id, test.id(), questions, test.timer_seconds())
    }

    /// Start the attempt; the wall clock for untimed sessions runs from `now`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless the session is `NotStarted`.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        self.require(SessionState::NotStarted, "start")?;
        self.started_at = Some(now);
        self.state = SessionState::InProgress;
        Ok(())
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
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
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn answers(&self) -> &[Answer] {
        &self.answers
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    #[must_use]
    pub fn is_timed(&self) -> bool {
        self.countdown.is_some()
    }

    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// The computed result, once every position holds an answer.
    #[must_use]
    pub fn result(&self) -> Option<&TestResult> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn result_id(&self) -> Option<ResultId> {
        self.result_id
    }

    /// The question awaiting an answer, only while the session is in progress.
    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        if self.state == SessionState::InProgress {
            self.questions.get(self.current)
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_last_question(&self) -> bool {
        self.state == SessionState::InProgress && self.current + 1 == self.questions.len()
    }

    /// Ledger entry already held for the current position, after a step back.
    #[must_use]
    pub fn pending_answer(&self) -> Option<&Answer> {
        if self.state == SessionState::InProgress {
            self.answers.get(self.current)
        } else {
            None
        }
    }

    /// Seconds left on the timer; `None` for untimed sessions.
    #[must_use]
    pub fn remaining_seconds(&self) -> Option<u32> {
        self.countdown.map(|c| c.left())
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        SessionProgress {
            total: self.questions.len(),
            answered: self.answers.len(),
            current: self.current,
            remaining_seconds: self.remaining_seconds(),
            is_complete: self.state == SessionState::Completed,
        }
    }

    /// Check `answer` against the current question without touching the ledger.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` outside `InProgress`, `AnswerKindMismatch` when the
    /// arity does not match the question, `NoAnswerSelected` for an unselected
    /// answer and `OptionOutOfRange` for an index past the option list.
    pub fn validate_answer(&self, answer: &Answer) -> Result<(), SessionError> {
        self.require(SessionState::InProgress, "answer")?;
        let question = self
            .questions
            .get(self.current)
            .ok_or(SessionError::InvalidState {
                operation: "answer",
                state: self.state,
            })?;

        let expected = question.kind();
        if answer.kind() != expected {
            return Err(SessionError::AnswerKindMismatch {
                expected,
                got: answer.kind(),
            });
        }
        if answer.is_unanswered() {
            return Err(SessionError::NoAnswerSelected);
        }
        if let Some(index) = answer.out_of_range(question) {
            return Err(SessionError::OptionOutOfRange {
                index,
                len: question.option_count(),
            });
        }
        Ok(())
    }

    /// Check that `finish` would accept `answer` right now.
    ///
    /// # Errors
    ///
    /// Same as [`TestSession::validate_answer`], plus `InvalidState` when the
    /// current question is not the last one.
    pub fn validate_finish(&self, answer: &Answer) -> Result<(), SessionError> {
        self.require(SessionState::InProgress, "finish")?;
        if !self.is_last_question() {
            return Err(SessionError::InvalidState {
                operation: "finish before the last question",
                state: self.state,
            });
        }
        self.validate_answer(answer)
    }

    /// Store `answer` for the current position and move forward.
    ///
    /// On the last position the session moves to `Finishing` and the result is
    /// computed with `now` as its timestamp.
    ///
    /// # Errors
    ///
    /// See [`TestSession::validate_answer`]; the session is unchanged on error.
    pub fn record_and_advance(
        &mut self,
        answer: Answer,
        now: DateTime<Utc>,
    ) -> Result<Step, SessionError> {
        self.validate_answer(&answer)?;
        self.store(answer);
        self.current += 1;

        if self.current == self.questions.len() {
            self.close(now)?;
            Ok(Step::Finishing)
        } else {
            Ok(Step::Advanced {
                next_index: self.current,
            })
        }
    }

    /// Answer the last question and compute the result.
    ///
    /// # Errors
    ///
    /// See [`TestSession::validate_finish`].
    pub fn finish(&mut self, answer: Answer, now: DateTime<Utc>) -> Result<&TestResult, SessionError> {
        self.validate_finish(&answer)?;
        self.store(answer);
        self.current = self.questions.len();
        self.close(now)
    }

    /// Complete a timed session whose clock ran out.
    ///
    /// Unanswered positions get the "no answer" sentinel for their kind and the
    /// elapsed time is the whole time limit.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` outside `InProgress` or for an untimed session.
    pub fn force_timeout_finish(&mut self, now: DateTime<Utc>) -> Result<&TestResult, SessionError> {
        self.require(SessionState::InProgress, "force a timeout finish")?;
        let Some(countdown) = self.countdown.as_mut() else {
            return Err(SessionError::InvalidState {
                operation: "force a timeout finish on an untimed session",
                state: self.state,
            });
        };
        countdown.expire();

        let missing = self.questions[self.answers.len()..]
            .iter()
            .map(|q| Answer::unanswered(q.kind()))
            .collect::<Vec<_>>();
        self.answers.extend(missing);
        self.current = self.questions.len();
        self.timed_out = true;
        self.close(now)
    }

    /// Consume one timer second while in progress.
    pub fn tick(&mut self) -> TickOutcome {
        if self.state != SessionState::InProgress {
            return TickOutcome::Idle;
        }
        self.countdown
            .as_mut()
            .map_or(TickOutcome::Idle, Countdown::tick)
    }

    /// Return to the last answered position so it can be re-answered.
    ///
    /// Only one step is possible: the ledger entry stays in place and is
    /// replaced by the next accepted answer.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` outside `InProgress`, on the first question, or
    /// when already stepped back.
    pub fn step_back(&mut self) -> Result<&Question, SessionError> {
        self.require(SessionState::InProgress, "step back")?;
        if self.current == 0 || self.answers.len() != self.current {
            return Err(SessionError::InvalidState {
                operation: "step back more than one question",
                state: self.state,
            });
        }
        self.current -= 1;
        Ok(&self.questions[self.current])
    }

    /// Seal the session once its result row exists.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the session is `Finishing`.
    pub fn mark_recorded(&mut self, result_id: ResultId) -> Result<SessionCompletion, SessionError> {
        self.require(SessionState::Finishing, "mark recorded")?;
        let result = self.result.as_ref().ok_or(SessionError::InvalidState {
            operation: "mark recorded without a result",
            state: self.state,
        })?;

        let completion = SessionCompletion {
            result_id,
            score_percent: result.score_percent(),
            elapsed_seconds: result.elapsed_seconds(),
            timed_out: self.timed_out,
        };
        self.result_id = Some(result_id);
        self.state = SessionState::Completed;
        Ok(completion)
    }

    fn require(&self, expected: SessionState, operation: &'static str) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn store(&mut self, answer: Answer) {
        if let Some(slot) = self.answers.get_mut(self.current) {
            *slot = answer;
        } else {
            self.answers.push(answer);
        }
    }

    fn elapsed_seconds(&self, now: DateTime<Utc>) -> u32 {
        match (self.countdown, self.started_at) {
            (Some(countdown), _) => countdown.elapsed(),
            (None, Some(started_at)) => whole_seconds_between(started_at, now),
            (None, None) => 0,
        }
    }

    fn close(&mut self, now: DateTime<Utc>) -> Result<&TestResult, SessionError> {
        let score = scoring::score(&self.questions, &self.answers);
        let result = TestResult::new(
            self.user_id,
            self.test_id,
            score,
            now,
            Some(self.elapsed_seconds(now)),
        )?;
        self.state = SessionState::Finishing;
        Ok(&*self.result.insert(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use quiz_core::model::QuestionId;
    use quiz_core::time::fixed_now;

    fn single(id: u64, correct: usize) -> Question {
        Question::with_single_correct(
            QuestionId::new(id),
            u32::try_from(id).unwrap(),
            format!("Question {id}"),
            vec!["a".into(), "b".into(), "c".into()],
            correct,
        )
        .unwrap()
    }

    fn multiple(id: u64, correct: &[usize]) -> Question {
        Question::new(
            QuestionId::new(id),
            u32::try_from(id).unwrap(),
            format!("Question {id}"),
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct.iter().copied(),
        )
        .unwrap()
    }

    fn started(questions: Vec<Question>, timer: Option<u32>) -> TestSession {
        let mut session = TestSession::new(UserId::new(1), TestId::new(1), questions, timer).unwrap();
        session.start(fixed_now()).unwrap();
        session
    }

    #[test]
    fn empty_test_is_rejected() {
        let err = TestSession::new(UserId::new(1), TestId::new(1), Vec::new(), None).unwrap_err();
        assert!(matches!(err, SessionError::EmptyTest));
    }

    #[test]
    fn operations_before_start_are_invalid() {
        let mut session =
            TestSession::new(UserId::new(1), TestId::new(1), vec![single(1, 0)], None).unwrap();
        assert_eq!(session.state(), SessionState::NotStarted);
        assert!(session.current_question().is_none());
        let err = session.record_and_advance(Answer::single(0), fixed_now()).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                state: SessionState::NotStarted,
                ..
            }
        ));
    }

    #[test]
    fn unselected_answer_leaves_session_untouched() {
        let mut session = started(vec![single(1, 0), multiple(2, &[0, 1])], None);

        let err = session
            .record_and_advance(Answer::from_index(-1), fixed_now())
            .unwrap_err();
        assert!(matches!(err, SessionError::NoAnswerSelected));
        assert!(err.is_recoverable());
        assert!(session.answers().is_empty());
        assert_eq!(session.current_index(), 0);

        session.record_and_advance(Answer::single(0), fixed_now()).unwrap();
        let err = session
            .record_and_advance(Answer::multiple([]), fixed_now())
            .unwrap_err();
        assert!(matches!(err, SessionError::NoAnswerSelected));
        assert_eq!(session.answers().len(), 1);
    }

    #[test]
    fn wrong_arity_and_out_of_range_are_rejected() {
        let mut session = started(vec![single(1, 0), multiple(2, &[0, 1])], None);

        let err = session
            .record_and_advance(Answer::multiple([0]), fixed_now())
            .unwrap_err();
        assert!(matches!(err, SessionError::AnswerKindMismatch { .. }));

        let err = session
            .record_and_advance(Answer::single(3), fixed_now())
            .unwrap_err();
        assert!(matches!(err, SessionError::OptionOutOfRange { index: 3, len: 3 }));
        assert!(session.answers().is_empty());
    }

    #[test]
    fn answering_every_question_reaches_finishing_with_result() {
        let mut session = started(vec![single(1, 1), single(2, 0), single(3, 2)], None);
        let later = fixed_now() + Duration::seconds(95);

        assert_eq!(
            session.record_and_advance(Answer::single(1), later).unwrap(),
            Step::Advanced { next_index: 1 }
        );
        session.record_and_advance(Answer::single(0), later).unwrap();
        assert!(session.is_last_question());
        assert_eq!(
            session.record_and_advance(Answer::single(0), later).unwrap(),
            Step::Finishing
        );

        assert_eq!(session.state(), SessionState::Finishing);
        assert_eq!(session.answers().len(), session.questions().len());
        let result = session.result().unwrap();
        assert_eq!(result.score_percent(), 67);
        assert_eq!(result.elapsed_seconds(), Some(95));
        assert_eq!(result.recorded_at(), later);
        assert!(session.current_question().is_none());
    }

    #[test]
    fn finish_only_on_last_question() {
        let mut session = started(vec![single(1, 0), single(2, 1)], None);

        let err = session.finish(Answer::single(0), fixed_now()).unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));
        assert!(session.answers().is_empty());

        session.record_and_advance(Answer::single(0), fixed_now()).unwrap();
        let result = session.finish(Answer::single(1), fixed_now()).unwrap();
        assert_eq!(result.score_percent(), 100);

        let completion = session.mark_recorded(7).unwrap();
        assert_eq!(completion.result_id, 7);
        assert_eq!(session.state(), SessionState::Completed);

        let err = session.finish(Answer::single(1), fixed_now()).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                state: SessionState::Completed,
                ..
            }
        ));
    }

    #[test]
    fn step_back_replaces_entry_without_deleting() {
        let mut session = started(vec![single(1, 0), single(2, 1), single(3, 2)], None);
        assert!(session.step_back().is_err());

        session.record_and_advance(Answer::single(2), fixed_now()).unwrap();
        let question = session.step_back().unwrap();
        assert_eq!(question.position(), 1);
        assert_eq!(session.pending_answer(), Some(&Answer::single(2)));
        assert_eq!(session.answers().len(), 1);

        // Only one step is available.
        assert!(session.step_back().is_err());

        session.record_and_advance(Answer::single(0), fixed_now()).unwrap();
        assert_eq!(session.answers(), &[Answer::single(0)]);
        assert_eq!(session.current_index(), 1);
        assert!(session.pending_answer().is_none());
    }

    #[test]
    fn timeout_fills_remaining_positions_with_sentinels() {
        let questions = vec![
            single(1, 0),
            multiple(2, &[1, 2]),
            single(3, 1),
            multiple(4, &[0, 3]),
            single(5, 2),
        ];
        let mut session = started(questions, Some(60));
        session.record_and_advance(Answer::single(0), fixed_now()).unwrap();
        session.record_and_advance(Answer::multiple([1, 2]), fixed_now()).unwrap();
        session.record_and_advance(Answer::single(0), fixed_now()).unwrap();
        session.tick();

        let result = session.force_timeout_finish(fixed_now()).unwrap();
        assert_eq!(result.score_percent(), 40);
        assert_eq!(result.elapsed_seconds(), Some(60));
        assert_eq!(session.answers().len(), 5);
        assert_eq!(session.answers()[3], Answer::Multiple(Default::default()));
        assert_eq!(session.answers()[4], Answer::Single(None));
        assert!(session.timed_out());
        assert_eq!(session.remaining_seconds(), Some(0));
    }

    #[test]
    fn timeout_requires_a_timer() {
        let mut session = started(vec![single(1, 0)], None);
        let err = session.force_timeout_finish(fixed_now()).unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));
        assert_eq!(session.tick(), TickOutcome::Idle);
    }

    #[test]
    fn timed_elapsed_is_limit_minus_left() {
        let mut session = started(vec![single(1, 0)], Some(30));
        for _ in 0..12 {
            session.tick();
        }
        assert_eq!(session.remaining_seconds(), Some(18));
        let result = session.finish(Answer::single(0), fixed_now()).unwrap();
        assert_eq!(result.elapsed_seconds(), Some(12));
        assert_eq!(session.tick(), TickOutcome::Idle);
    }
}
