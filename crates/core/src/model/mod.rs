mod answer;
mod ids;
mod question;
mod result;

pub use answer::{Answer, UNSELECTED};
pub use ids::{ParseIdError, QuestionId, SessionId, TestId, UserId};
pub use question::{ChoiceKind, MAX_OPTIONS, MIN_OPTIONS, Question, QuestionError};
pub use result::{Mark, ResultError, TestResult};
pub use test::{Test, TestError};
