use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Granularity of the session timer.
pub const TICK: Duration = Duration::from_secs(1);

/// Outcome of a single timer tick applied to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The session is untimed or no longer in progress; nothing changed.
    Idle,
    /// One second was consumed and time remains.
    Running { remaining: u32 },
    /// The last second was consumed by this tick.
    Expired,
}

/// Whole-second countdown for a timed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    total: u32,
    left: u32,
}

impl Countdown {
    /// Returns `None` for a zero limit; only positive limits are timed.
    #[must_use]
    pub fn new(total: u32) -> Option<Self> {
        (total > 0).then_some(Self { total, left: total })
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    #[must_use]
    pub fn left(&self) -> u32 {
        self.left
    }

    #[must_use]
    pub fn elapsed(&self) -> u32 {
        self.total - self.left
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.left == 0
    }

    /// Consume one second. Reports `Expired` only on the tick that reaches zero.
    pub fn tick(&mut self) -> TickOutcome {
        match self.left {
            0 => TickOutcome::Idle,
            1 => {
                self.left = 0;
                TickOutcome::Expired
            }
            n => {
                self.left = n - 1;
                TickOutcome::Running { remaining: n - 1 }
            }
        }
    }

    /// Drop all remaining time, as on a forced completion.
    pub fn expire(&mut self) {
        self.left = 0;
    }
}

/// Cancellation handle for a running ticker task. Dropping it cancels the task.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.task.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn a task calling `on_tick` every `period` until it returns `Break`.
///
/// The first call happens one full period after spawning. Ticks missed while
/// `on_tick` runs are delayed rather than bursted, so each call stands for one
/// period.
pub fn spawn_ticker<F, Fut>(period: Duration, mut on_tick: F) -> TimerHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ControlFlow<()>> + Send + 'static,
{
    let task = tokio::spawn(async move {
        let mut interval = time::interval_at(time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if on_tick().await.is_break() {
                break;
            }
        }
    });
    TimerHandle { task }
}
