use std::fmt;

use quiz_core::model::{Question, QuestionId, Test, TestId};
use storage::repository::Storage;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    test_id: TestId,
    test_name: String,
    timer_seconds: Option<u32>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidTestId { raw: String },
    InvalidTimer { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidTestId { raw } => write!(f, "invalid --test-id value: {raw}"),
            ArgsError::InvalidTimer { raw } => write!(f, "invalid --timer-seconds value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_timer(value: &str) -> Result<Option<u32>, ArgsError> {
    match value.parse::<u32>() {
        Ok(0) => Ok(None),
        Ok(secs) => Ok(Some(secs)),
        Err(_) => Err(ArgsError::InvalidTimer {
            raw: value.to_string(),
        }),
    }
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("QUIZ_DB_URL").unwrap_or_else(|_| "sqlite:quiz.sqlite3?mode=rwc".into());
        let mut test_id = std::env::var("QUIZ_TEST_ID")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map_or_else(|| TestId::new(1), TestId::new);
        let mut test_name =
            std::env::var("QUIZ_TEST_NAME").unwrap_or_else(|_| "European capitals".into());
        let mut timer_seconds = Some(120);

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--test-id" => {
                    let value = require_value(&mut args, "--test-id")?;
                    let parsed: u64 = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidTestId { raw: value.clone() })?;
                    test_id = TestId::new(parsed);
                }
                "--test-name" => {
                    test_name = require_value(&mut args, "--test-name")?;
                }
                "--timer-seconds" => {
                    let value = require_value(&mut args, "--timer-seconds")?;
                    timer_seconds = parse_timer(&value)?;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            test_id,
            test_name,
            timer_seconds,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite:quiz.sqlite3?mode=rwc)");
    eprintln!("  --test-id <id>            Test id to upsert (default: 1)");
    eprintln!("  --test-name <name>        Test name (default: European capitals)");
    eprintln!("  --timer-seconds <n>       Time limit, 0 for untimed (default: 120)");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  QUIZ_DB_URL, QUIZ_TEST_ID, QUIZ_TEST_NAME");
}

/// Sample bank: (text, options, correct option indices).
const SAMPLES: &[(&str, &[&str], &[usize])] = &[
    ("Capital of France?", &["Berlin", "Paris", "Madrid"], &[1]),
    ("Capital of Norway?", &["Oslo", "Bergen", "Stockholm"], &[0]),
    (
        "Which cities are capitals?",
        &["Rome", "Milan", "Vienna", "Zurich"],
        &[0, 2],
    ),
    ("Capital of Portugal?", &["Porto", "Braga", "Lisbon"], &[2]),
    (
        "Which cities lie on the Danube?",
        &["Budapest", "Prague", "Vienna", "Warsaw"],
        &[0, 2],
    ),
];

/// Question ids are `test_id * QUESTION_ID_STRIDE + position`.
const QUESTION_ID_STRIDE: u64 = 1_000;

fn sample_test(args: &Args) -> Result<(Test, Vec<Question>), Box<dyn std::error::Error>> {
    let test = Test::new(args.test_id, args.test_name.clone(), args.timer_seconds)?;
    let base = test
        .id()
        .value()
        .checked_mul(QUESTION_ID_STRIDE)
        .ok_or_else(|| ArgsError::InvalidTestId {
            raw: test.id().to_string(),
        })?;
    let questions = (1_u32..)
        .zip(SAMPLES)
        .map(|(offset, (text, options, correct))| {
            Question::new(
                QuestionId::new(base + u64::from(offset)),
                offset,
                *text,
                options.iter().map(|o| (*o).to_string()).collect(),
                correct.iter().copied(),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((test, questions))
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let (test, questions) = sample_test(&args)?;
    let storage = Storage::sqlite(&args.db_url).await?;

    storage.tests.upsert_test(&test).await?;
    for question in &questions {
        storage.questions.upsert_question(test.id(), question).await?;
    }

    println!(
        "Seeded test {} ({:?}) with {} questions into {}",
        test.id(),
        test.name(),
        questions.len(),
        args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
