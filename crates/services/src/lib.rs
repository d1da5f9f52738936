#![forbid(unsafe_code)]

pub mod app_services;
pub mod error;
pub mod sessions;

pub use quiz_core::Clock;
pub use sessions as session;

pub use app_services::AppServices;
pub use error::{AppServicesError, JournalError, SessionError};

pub use sessions::{
    JournalEntry, JournalSummary, LiveSession, LiveStatus, LiveStep, ResultJournalService,
    SessionAnswerResult, SessionCompletion, SessionLoopService, SessionState, TestSession,
};
