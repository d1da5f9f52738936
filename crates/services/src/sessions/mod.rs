mod live;
mod progress;
mod recorder;
mod service;
mod timer;
mod view;
mod workflow;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use live::{CompletionCallback, LiveSession, LiveStatus, LiveStep};
pub use progress::SessionProgress;
pub use recorder::ResultRecorder;
pub use service::{SessionCompletion, SessionState, Step, TestSession};
pub use timer::{Countdown, TICK, TickOutcome, TimerHandle, spawn_ticker};
pub use view::{JournalEntry, JournalSummary, ResultJournalService, TEST_SCAN_LIMIT, average_mark};
pub use workflow::{SessionAnswerResult, SessionLoopService};
