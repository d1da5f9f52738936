use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use quiz_core::model::{Answer, Question, QuestionId, Test, TestId, TestResult, UserId};
use quiz_core::time::fixed_now;
use services::{
    Clock, LiveSession, LiveStatus, LiveStep, SessionCompletion, SessionLoopService, SessionState,
};
use storage::repository::{
    InMemoryRepository, ResultId, ResultRepository, ResultRow, Storage, StorageError,
};
use tokio::time::{Instant, sleep, sleep_until};

const USER: UserId = UserId::new(7);

async fn timed_service(timer_seconds: u32) -> (Storage, Arc<SessionLoopService>) {
    let storage = Storage::in_memory();
    let results = Arc::clone(&storage.results);
    let service = timed_service_over(&storage, timer_seconds, results).await;
    (storage, service)
}

async fn timed_service_over(
    storage: &Storage,
    timer_seconds: u32,
    results: Arc<dyn ResultRepository>,
) -> Arc<SessionLoopService> {
    let test = Test::new(TestId::new(1), "Mixed bag", Some(timer_seconds)).unwrap();
    storage.tests.upsert_test(&test).await.unwrap();

    let correct: [&[usize]; 5] = [&[0], &[1, 2], &[1], &[0, 3], &[2]];
    for (pos, set) in (1_u32..).zip(correct) {
        let question = Question::new(
            QuestionId::new(u64::from(pos)),
            pos,
            format!("Question {pos}"),
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            set.iter().copied(),
        )
        .unwrap();
        storage.questions.upsert_question(test.id(), &question).await.unwrap();
    }

    Arc::new(SessionLoopService::new(
        Clock::fixed(fixed_now()),
        Arc::clone(&storage.tests),
        Arc::clone(&storage.questions),
        results,
    ))
}

async fn recorded(storage: &Storage) -> usize {
    storage
        .results
        .list_results_for_user(USER, 100)
        .await
        .unwrap()
        .len()
}

#[tokio::test(start_paused = true)]
async fn timeout_fills_unanswered_and_records_once() {
    let (storage, service) = timed_service(5).await;
    let session = service.start_session(USER, TestId::new(1)).await.unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&calls);
    let live = LiveSession::spawn_with_callback(
        service,
        session,
        Arc::new(move |_: &SessionCompletion| {
            seen.fetch_add(1, Ordering::SeqCst);
        }),
    );

    for answer in [Answer::single(0), Answer::multiple([1, 2]), Answer::single(0)] {
        let step = live.record_and_advance(answer).await.unwrap();
        assert!(matches!(step, LiveStep::Advanced(_)));
    }
    assert_eq!(live.remaining_seconds().await, Some(5));

    sleep(Duration::from_millis(3_500)).await;
    assert_eq!(live.remaining_seconds().await, Some(2));

    let LiveStatus::Completed(completion) = live.wait_closed().await else {
        panic!("expected a recorded completion");
    };
    assert!(completion.timed_out);
    assert_eq!(completion.elapsed_seconds, Some(5));
    assert_eq!(completion.score_percent, 40);

    let snapshot = live.snapshot().await;
    assert_eq!(snapshot.state(), SessionState::Completed);
    assert_eq!(snapshot.answers().len(), 5);
    assert!(snapshot.answers()[3..].iter().all(Answer::is_unanswered));

    // Late user input is ignored.
    let late = live.record_and_advance(Answer::multiple([0, 3])).await.unwrap();
    assert_eq!(late, LiveStep::Closed);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(recorded(&storage).await, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn timer_and_user_finish_race_records_once() {
    let (storage, service) = timed_service(5).await;
    let session = service.start_session(USER, TestId::new(1)).await.unwrap();
    let started = Instant::now();
    let live = Arc::new(LiveSession::spawn(service, session));

    for answer in [
        Answer::single(0),
        Answer::multiple([1, 2]),
        Answer::single(1),
        Answer::multiple([0, 3]),
    ] {
        live.record_and_advance(answer).await.unwrap();
    }
    assert!(live.is_last_question().await);

    let user = {
        let live = Arc::clone(&live);
        tokio::spawn(async move {
            sleep_until(started + Duration::from_secs(5)).await;
            live.finish(Answer::single(2)).await
        })
    };
    let outcome = user.await.unwrap().unwrap();
    let status = live.wait_closed().await;

    match (outcome, status) {
        (LiveStep::Completed(by_user), LiveStatus::Completed(seen)) => {
            assert!(!by_user.timed_out);
            assert_eq!(by_user.score_percent, 100);
            assert_eq!(seen, by_user);
        }
        (LiveStep::Closed, LiveStatus::Completed(by_timer)) => {
            assert!(by_timer.timed_out);
            assert_eq!(by_timer.score_percent, 80);
        }
        other => panic!("unexpected race outcome: {other:?}"),
    }

    sleep(Duration::from_secs(10)).await;
    assert_eq!(recorded(&storage).await, 1);
}

#[tokio::test(start_paused = true)]
async fn user_finish_cancels_timer() {
    let (storage, service) = timed_service(30).await;
    let session = service.start_session(USER, TestId::new(1)).await.unwrap();
    let live = LiveSession::spawn(service, session);

    live.record_and_advance(Answer::single(1)).await.unwrap();
    sleep(Duration::from_millis(4_500)).await;

    // Re-answer the first question after stepping back once.
    let first = live.step_back().await.unwrap();
    assert_eq!(first.position(), 1);
    assert_eq!(live.pending_answer().await, Some(Answer::single(1)));
    assert!(live.step_back().await.is_err());
    live.record_and_advance(Answer::single(0)).await.unwrap();

    live.record_and_advance(Answer::multiple([1, 2])).await.unwrap();
    live.record_and_advance(Answer::single(1)).await.unwrap();
    live.record_and_advance(Answer::multiple([0, 3])).await.unwrap();
    let LiveStep::Completed(completion) = live.finish(Answer::single(2)).await.unwrap() else {
        panic!("expected the user to complete the session");
    };
    assert!(!completion.timed_out);
    assert_eq!(completion.score_percent, 100);
    assert_eq!(completion.elapsed_seconds, Some(4));

    sleep(Duration::from_secs(60)).await;
    assert_eq!(live.status(), LiveStatus::Completed(completion));
    assert_eq!(live.remaining_seconds().await, Some(26));
    assert_eq!(recorded(&storage).await, 1);
}

/// Result store that is down until told otherwise.
#[derive(Clone, Default)]
struct FlakyResults {
    inner: InMemoryRepository,
    up: Arc<AtomicBool>,
}

#[async_trait]
impl ResultRepository for FlakyResults {
    async fn append_result(&self, result: &TestResult) -> Result<ResultId, StorageError> {
        if self.up.load(Ordering::SeqCst) {
            self.inner.append_result(result).await
        } else {
            Err(StorageError::Connection("database is locked".into()))
        }
    }

    async fn get_result(&self, id: ResultId) -> Result<TestResult, StorageError> {
        self.inner.get_result(id).await
    }

    async fn list_results_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<ResultRow>, StorageError> {
        self.inner.list_results_for_user(user_id, limit).await
    }

    async fn list_results_for_test(
        &self,
        test_id: TestId,
        limit: u32,
    ) -> Result<Vec<ResultRow>, StorageError> {
        self.inner.list_results_for_test(test_id, limit).await
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_write_failure_is_reported_and_retryable() {
    let storage = Storage::in_memory();
    let results = FlakyResults::default();
    let service = timed_service_over(&storage, 5, Arc::new(results.clone())).await;
    let session = service.start_session(USER, TestId::new(1)).await.unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&calls);
    let live = LiveSession::spawn_with_callback(
        service,
        session,
        Arc::new(move |_: &SessionCompletion| {
            seen.fetch_add(1, Ordering::SeqCst);
        }),
    );

    live.record_and_advance(Answer::single(0)).await.unwrap();
    live.record_and_advance(Answer::multiple([1, 2])).await.unwrap();

    let LiveStatus::RecordFailed(reason) = live.wait_closed().await else {
        panic!("expected the timed out write to fail");
    };
    assert!(reason.contains("database is locked"));
    assert_eq!(live.state().await, SessionState::Finishing);
    assert!(results.list_results_for_user(USER, 10).await.unwrap().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // The timer is gone; late input cannot reopen the session.
    let late = live.record_and_advance(Answer::single(1)).await.unwrap();
    assert_eq!(late, LiveStep::Closed);

    results.up.store(true, Ordering::SeqCst);
    let completion = live.retry_record().await.unwrap();
    assert!(completion.timed_out);
    assert_eq!(completion.score_percent, 40);
    assert_eq!(live.status(), LiveStatus::Completed(completion));
    assert_eq!(live.state().await, SessionState::Completed);
    assert_eq!(results.list_results_for_user(USER, 10).await.unwrap().len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    live.retry_record().await.unwrap();
    assert_eq!(results.list_results_for_user(USER, 10).await.unwrap().len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
