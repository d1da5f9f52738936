//! Interactive test taking on stdin/stdout.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use quiz_core::model::{Answer, ChoiceKind, Mark, Question, TestId, UNSELECTED, UserId};
use quiz_core::time::format_duration;
use services::{AppServices, LiveSession, LiveStatus, LiveStep, SessionCompletion};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{self, MissedTickBehavior};
use tracing::info;

/// How often the countdown line is considered for a refresh.
const COUNTDOWN_POLL: Duration = Duration::from_secs(1);

/// One line of student input, parsed against the question it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Answer(Answer),
    Back,
    Invalid(String),
}

/// Options are shown 1-based; a blank line submits "nothing selected".
pub fn parse_input(line: &str, question: &Question) -> Input {
    let line = line.trim();
    if line.eq_ignore_ascii_case("back") || line.eq_ignore_ascii_case("b") {
        return Input::Back;
    }

    let mut picked = BTreeSet::new();
    for token in line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        match token.parse::<usize>() {
            Ok(n) if n >= 1 => {
                picked.insert(n - 1);
            }
            _ => return Input::Invalid(format!("not an option number: {token}")),
        }
    }

    match question.kind() {
        ChoiceKind::Multiple => Input::Answer(Answer::Multiple(picked)),
        ChoiceKind::Single => match picked.len() {
            0 => Input::Answer(Answer::from_index(UNSELECTED)),
            1 => Input::Answer(Answer::Single(picked.pop_first())),
            _ => Input::Invalid("pick exactly one option".into()),
        },
    }
}

fn render(question: &Question, pending: Option<&Answer>, remaining: Option<u32>, is_last: bool) {
    println!();
    if let Some(left) = remaining {
        println!("[time left: {}]", format_duration(left));
    }
    println!("{}", question.label());
    let selected = pending.map(Answer::selected).unwrap_or_default();
    for (index, option) in question.options().iter().enumerate() {
        let marker = if selected.contains(&index) { '*' } else { ' ' };
        println!(" {marker}{}. {option}", index + 1);
    }
    let hint = match question.kind() {
        ChoiceKind::Single => "one option number",
        ChoiceKind::Multiple => "option numbers separated by commas",
    };
    let action = if is_last { "finish" } else { "continue" };
    println!("Enter {hint} to {action} (\"back\" revisits the previous question):");
}

/// Countdown lines go out every ten seconds, then every second near the end.
fn countdown_due(left: u32) -> bool {
    left <= 5 || left % 10 == 0
}

fn report(completion: &SessionCompletion) {
    if completion.timed_out {
        println!("Time is up.");
    }
    let mark = Mark::from_percent(completion.score_percent);
    println!(
        "Score: {}%  Mark: {}  Time: {}",
        completion.score_percent,
        mark.value(),
        completion
            .elapsed_seconds
            .map_or_else(|| "-".into(), format_duration)
    );
}

/// Run one session for `user_id` on `test_id` until it completes or input ends.
///
/// # Errors
///
/// Returns session start failures, unrecoverable session errors and a failed
/// result write.
pub async fn run(
    services: &AppServices,
    user_id: UserId,
    test_id: TestId,
) -> Result<(), Box<dyn std::error::Error>> {
    let session_loop = services.session_loop();
    let session = session_loop.start_session(user_id, test_id).await?;
    let live = LiveSession::spawn_with_callback(
        session_loop,
        session,
        Arc::new(|completion: &SessionCompletion| {
            info!(result_id = completion.result_id, "result saved");
        }),
    );

    let mut status = live.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let Some(question) = live.current_question().await else {
            break;
        };
        let is_last = live.is_last_question().await;
        render(
            &question,
            live.pending_answer().await.as_ref(),
            live.remaining_seconds().await,
            is_last,
        );

        let mut countdown = time::interval_at(time::Instant::now() + COUNTDOWN_POLL, COUNTDOWN_POLL);
        countdown.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shown = live.remaining_seconds().await;

        let line = loop {
            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() || *status.borrow() != LiveStatus::Running {
                        break None;
                    }
                }
                _ = countdown.tick(), if shown.is_some() => {
                    let left = live.remaining_seconds().await;
                    if let Some(due) = left.filter(|l| left != shown && countdown_due(*l)) {
                        println!("[time left: {}]", format_duration(due));
                    }
                    shown = left;
                }
                line = lines.next_line() => break Some(line?),
            }
        };

        let Some(line) = line else {
            break;
        };
        let Some(line) = line else {
            println!("Input closed; the attempt was not recorded.");
            return Ok(());
        };
        match parse_input(&line, &question) {
            Input::Back => {
                if let Err(err) = live.step_back().await {
                    println!("{err}");
                }
            }
            Input::Invalid(reason) => println!("{reason}"),
            Input::Answer(answer) => {
                let step = if is_last {
                    live.finish(answer).await
                } else {
                    live.record_and_advance(answer).await
                };
                match step {
                    Ok(LiveStep::Advanced(_)) => {}
                    Ok(LiveStep::Completed(_) | LiveStep::Closed) => break,
                    Err(err) if err.is_recoverable() => println!("{err}; try again"),
                    Err(err) => return Err(err.into()),
                }
            }
        }
    }

    match live.wait_closed().await {
        LiveStatus::Completed(completion) => {
            report(&completion);
            Ok(())
        }
        LiveStatus::RecordFailed(reason) => {
            Err(format!("the result could not be saved: {reason}").into())
        }
        LiveStatus::Running => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::model::QuestionId;

    fn question(correct: &[usize]) -> Question {
        Question::new(
            QuestionId::new(1),
            1,
            "Pick",
            vec!["a".into(), "b".into(), "c".into()],
            correct.iter().copied(),
        )
        .unwrap()
    }

    #[test]
    fn single_choice_input_is_one_based() {
        let q = question(&[1]);
        assert_eq!(parse_input(" 2 ", &q), Input::Answer(Answer::single(1)));
        assert_eq!(parse_input("", &q), Input::Answer(Answer::Single(None)));
        assert!(matches!(parse_input("1,2", &q), Input::Invalid(_)));
        assert!(matches!(parse_input("0", &q), Input::Invalid(_)));
    }

    #[test]
    fn multiple_choice_input_collects_a_set() {
        let q = question(&[0, 2]);
        assert_eq!(
            parse_input("3, 1 3", &q),
            Input::Answer(Answer::multiple([0, 2]))
        );
        assert_eq!(parse_input("", &q), Input::Answer(Answer::multiple([])));
        assert_eq!(parse_input("Back", &q), Input::Back);
        assert!(matches!(parse_input("x", &q), Input::Invalid(_)));
    }

    #[test]
    fn countdown_refreshes_on_tens_and_final_seconds() {
        assert!(countdown_due(120));
        assert!(countdown_due(30));
        assert!(!countdown_due(29));
        assert!(!countdown_due(6));
        assert!(countdown_due(5));
        assert!(countdown_due(0));
    }
}
