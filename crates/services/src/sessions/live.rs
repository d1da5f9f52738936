use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use quiz_core::model::{Answer, Question};
use tokio::sync::{Mutex, watch};
use tracing::{debug, error};

use super::progress::SessionProgress;
use super::service::{SessionCompletion, SessionState, TestSession};
use super::timer::{self, TickOutcome, TimerHandle};
use super::workflow::SessionLoopService;
use crate::error::SessionError;

/// Callback invoked once with the recorded completion.
pub type CompletionCallback = Arc<dyn Fn(&SessionCompletion) + Send + Sync>;

/// Observable status of a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveStatus {
    Running,
    Completed(SessionCompletion),
    /// Answers are final but the result write failed; see [`LiveSession::retry_record`].
    RecordFailed(String),
}

/// Outcome of a user action on a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveStep {
    Advanced(SessionProgress),
    Completed(SessionCompletion),
    /// The session was already closed by the timer; the action had no effect.
    Closed,
}

struct Shared {
    service: Arc<SessionLoopService>,
    session: Mutex<TestSession>,
    finishing: AtomicBool,
    status: watch::Sender<LiveStatus>,
    on_complete: Option<CompletionCallback>,
}

impl Shared {
    /// Single-writer guard on leaving `InProgress`: only the first caller wins.
    fn claim_finish(&self) -> bool {
        self.finishing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_finishing(&self) -> bool {
        self.finishing.load(Ordering::Acquire)
    }

    fn settle(&self, outcome: &Result<SessionCompletion, SessionError>) {
        match outcome {
            Ok(completion) => {
                self.status.send_replace(LiveStatus::Completed(completion.clone()));
                if let Some(callback) = &self.on_complete {
                    callback(completion);
                }
            }
            Err(err) => {
                self.status.send_replace(LiveStatus::RecordFailed(err.to_string()));
            }
        }
    }
}

/// A started session driven concurrently by the student and its timer.
///
/// Both paths serialize on the session lock, and the transition out of
/// `InProgress` is claimed through an atomic flag: whichever of timer expiry
/// or the final user answer claims it first completes the session, the other
/// becomes a no-op. The timer is cancelled when the student finishes.
pub struct LiveSession {
    shared: Arc<Shared>,
    timer: Option<TimerHandle>,
}

impl LiveSession {
    /// Wrap a started session and spawn its timer if it is timed.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn spawn(service: Arc<SessionLoopService>, session: TestSession) -> Self {
        Self::build(service, session, None)
    }

    /// Like [`LiveSession::spawn`], invoking `on_complete` once the result is recorded.
    #[must_use]
    pub fn spawn_with_callback(
        service: Arc<SessionLoopService>,
        session: TestSession,
        on_complete: CompletionCallback,
    ) -> Self {
        Self::build(service, session, Some(on_complete))
    }

    fn build(
        service: Arc<SessionLoopService>,
        session: TestSession,
        on_complete: Option<CompletionCallback>,
    ) -> Self {
        let timed = session.is_timed() && session.state() == SessionState::InProgress;
        let (status, _) = watch::channel(LiveStatus::Running);
        let shared = Arc::new(Shared {
            service,
            session: Mutex::new(session),
            finishing: AtomicBool::new(false),
            status,
            on_complete,
        });

        let timer = timed.then(|| {
            let weak = Arc::downgrade(&shared);
            timer::spawn_ticker(timer::TICK, move || on_tick(weak.clone()))
        });

        Self { shared, timer }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LiveStatus> {
        self.shared.status.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> LiveStatus {
        self.shared.status.borrow().clone()
    }

    /// Wait until the session leaves `Running`.
    pub async fn wait_closed(&self) -> LiveStatus {
        let mut rx = self.subscribe();
        match rx.wait_for(|status| *status != LiveStatus::Running).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.shared.session.lock().await.state()
    }

    pub async fn current_question(&self) -> Option<Question> {
        self.shared.session.lock().await.current_question().cloned()
    }

    pub async fn is_last_question(&self) -> bool {
        self.shared.session.lock().await.is_last_question()
    }

    pub async fn pending_answer(&self) -> Option<Answer> {
        self.shared.session.lock().await.pending_answer().cloned()
    }

    pub async fn remaining_seconds(&self) -> Option<u32> {
        self.shared.session.lock().await.remaining_seconds()
    }

    pub async fn progress(&self) -> SessionProgress {
        self.shared.session.lock().await.progress()
    }

    /// Snapshot of the session, e.g. to inspect the final ledger.
    pub async fn snapshot(&self) -> TestSession {
        self.shared.session.lock().await.clone()
    }

    /// # Errors
    ///
    /// See [`TestSession::step_back`].
    pub async fn step_back(&self) -> Result<Question, SessionError> {
        let mut session = self.shared.session.lock().await;
        session.step_back().cloned()
    }

    /// Answer the current question; the last answer completes the session.
    ///
    /// # Errors
    ///
    /// Validation errors leave the session unchanged. `SessionError::Storage`
    /// means the answers are final but the result was not written.
    pub async fn record_and_advance(&self, answer: Answer) -> Result<LiveStep, SessionError> {
        let mut session = self.shared.session.lock().await;
        if self.shared.is_finishing() {
            return Ok(LiveStep::Closed);
        }

        session.validate_answer(&answer)?;
        if !session.is_last_question() {
            self.shared.service.answer_current(&mut session, answer).await?;
            return Ok(LiveStep::Advanced(session.progress()));
        }

        if !self.shared.claim_finish() {
            return Ok(LiveStep::Closed);
        }
        self.cancel_timer();
        let outcome = self
            .shared
            .service
            .answer_current(&mut session, answer)
            .await
            .and_then(|step| {
                step.completion.ok_or(SessionError::InvalidState {
                    operation: "complete after the last answer",
                    state: session.state(),
                })
            });
        self.shared.settle(&outcome);
        outcome.map(LiveStep::Completed)
    }

    /// Answer the last question and complete the session.
    ///
    /// # Errors
    ///
    /// See [`TestSession::validate_finish`] and [`LiveSession::record_and_advance`].
    pub async fn finish(&self, answer: Answer) -> Result<LiveStep, SessionError> {
        let mut session = self.shared.session.lock().await;
        if self.shared.is_finishing() {
            return Ok(LiveStep::Closed);
        }

        session.validate_finish(&answer)?;
        if !self.shared.claim_finish() {
            return Ok(LiveStep::Closed);
        }
        self.cancel_timer();
        let outcome = self.shared.service.finish(&mut session, answer).await;
        self.shared.settle(&outcome);
        outcome.map(LiveStep::Completed)
    }

    /// Retry the result write after a `RecordFailed` status.
    ///
    /// # Errors
    ///
    /// See [`SessionLoopService::retry_record`].
    pub async fn retry_record(&self) -> Result<SessionCompletion, SessionError> {
        let mut session = self.shared.session.lock().await;
        let already_recorded = session.state() == SessionState::Completed;
        let outcome = self.shared.service.retry_record(&mut session).await;
        if !already_recorded {
            self.shared.settle(&outcome);
        }
        outcome
    }

    fn cancel_timer(&self) {
        if let Some(timer) = &self.timer {
            timer.cancel();
        }
    }
}

async fn on_tick(shared: Weak<Shared>) -> ControlFlow<()> {
    let Some(shared) = shared.upgrade() else {
        return ControlFlow::Break(());
    };
    if shared.is_finishing() {
        return ControlFlow::Break(());
    }

    let mut session = shared.session.lock().await;
    match session.tick() {
        TickOutcome::Running { remaining } => {
            debug!(session_id = %session.id(), remaining, "timer tick");
            ControlFlow::Continue(())
        }
        TickOutcome::Idle => ControlFlow::Break(()),
        TickOutcome::Expired => {
            if shared.claim_finish() {
                let outcome = shared.service.force_timeout_finish(&mut session).await;
                if let Err(err) = &outcome {
                    error!(session_id = %session.id(), error = %err, "timed out session was not recorded");
                }
                shared.settle(&outcome);
            }
            ControlFlow::Break(())
        }
    }
}
