use std::fmt;

use quiz_core::model::{TestId, UserId};
use quiz_core::time::format_duration;
use services::{AppServices, Clock};
use tracing_subscriber::EnvFilter;

mod take;

const JOURNAL_LIMIT: u32 = 50;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingTestId,
    UnknownArg(String),
    InvalidUserId { raw: String },
    InvalidTestId { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingTestId => write!(f, "take requires --test-id (or QUIZ_TEST_ID)"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidUserId { raw } => write!(f, "invalid --user-id value: {raw}"),
            ArgsError::InvalidTestId { raw } => write!(f, "invalid --test-id value: {raw}"),
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Take,
    Tests,
    Journal,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "take" => Some(Self::Take),
            "tests" => Some(Self::Tests),
            "journal" => Some(Self::Journal),
            _ => None,
        }
    }
}

struct Args {
    db_url: String,
    user_id: UserId,
    test_id: Option<TestId>,
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- take    [--db <sqlite_url>] [--user-id <id>] --test-id <id>");
    eprintln!("  cargo run -p app -- tests   [--db <sqlite_url>] [--user-id <id>]");
    eprintln!("  cargo run -p app -- journal [--db <sqlite_url>] [--user-id <id>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite://quiz.sqlite3");
    eprintln!("  --user-id 1");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  QUIZ_DB_URL, QUIZ_USER_ID, QUIZ_TEST_ID, RUST_LOG");
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("QUIZ_DB_URL")
            .ok()
            .map_or_else(|| normalize_sqlite_url("quiz.sqlite3".into()), normalize_sqlite_url);
        let mut user_id = std::env::var("QUIZ_USER_ID")
            .ok()
            .and_then(|value| value.parse::<UserId>().ok())
            .unwrap_or(UserId::new(1));
        let mut test_id = std::env::var("QUIZ_TEST_ID")
            .ok()
            .and_then(|value| value.parse::<TestId>().ok());

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--user-id" => {
                    let value = require_value(args, "--user-id")?;
                    user_id = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidUserId { raw: value.clone() })?;
                }
                "--test-id" => {
                    let value = require_value(args, "--test-id")?;
                    test_id = Some(
                        value
                            .parse()
                            .map_err(|_| ArgsError::InvalidTestId { raw: value.clone() })?,
                    );
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
            user_id,
            test_id,
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

async fn list_tests(services: &AppServices, user_id: UserId) -> Result<(), Box<dyn std::error::Error>> {
    let tests = services.journal().available_tests(user_id).await?;
    if tests.is_empty() {
        println!("No tests left to take for user {user_id}.");
        return Ok(());
    }
    for test in tests {
        let limit = test
            .timer_seconds()
            .map_or_else(|| "untimed".into(), format_duration);
        println!("{:>4}  {}  ({limit})", test.id(), test.name());
    }
    Ok(())
}

async fn print_journal(
    services: &AppServices,
    user_id: UserId,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary = services.journal().summary(user_id, JOURNAL_LIMIT).await?;
    if summary.entries.is_empty() {
        println!("No results recorded for user {user_id}.");
        return Ok(());
    }
    for entry in summary.entries {
        let name = entry
            .test_name
            .unwrap_or_else(|| format!("test {}", entry.test_id));
        let limit = entry
            .timer_seconds
            .map_or_else(|| "untimed".into(), format_duration);
        let elapsed = entry
            .elapsed_seconds
            .map_or_else(|| "-".into(), format_duration);
        println!(
            "{}  {name}  {}%  mark {}  limit {limit}  time {elapsed}",
            entry.recorded_at.format("%Y-%m-%d %H:%M"),
            entry.score_percent,
            entry.mark.value(),
        );
    }
    println!("Average mark: {:.2}", summary.average_mark);
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);

    let cmd = match argv.next() {
        None => {
            print_usage();
            return Ok(());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let parsed = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
    prepare_sqlite_file(&parsed.db_url)?;
    let services = AppServices::new_sqlite(&parsed.db_url, Clock::default_clock()).await?;

    match cmd {
        Command::Take => {
            let test_id = parsed.test_id.ok_or(ArgsError::MissingTestId)?;
            take::run(&services, parsed.user_id, test_id).await
        }
        Command::Tests => list_tests(&services, parsed.user_id).await,
        Command::Journal => print_journal(&services, parsed.user_id).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("services=info,app=info"));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
