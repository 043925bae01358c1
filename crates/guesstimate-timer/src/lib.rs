//! Deferred room transitions for Guesstimate.
//!
//! A room never sleeps. When it needs something to happen later ("reveal
//! the ranking in five seconds"), it arms a [`ScheduledTask`]: a small
//! Tokio task that waits out the delay and then posts a message back into
//! the room's own command channel. The room handles that message like any
//! other command, on its own task, so timer callbacks are serialized with
//! player actions.
//!
//! # Staleness
//!
//! A timer can outlive the situation it was armed for: the round may have
//! been advanced by another path, or the room may be gone. Two guards
//! cover this:
//!
//! 1. Every task is stamped with the room's [`Generation`] at arm time.
//!    The room compares it against its current generation when the
//!    message arrives and ignores stale ones.
//! 2. The room owns its tasks in a [`TimerSet`] and cancels them when the
//!    generation moves on or the room shuts down, so most stale timers
//!    never fire at all.
//!
//! If the room's channel is closed by the time a timer fires, the send
//! fails and the timer does nothing.
//!
//! ```ignore
//! let generation = room.generation();
//! timers.schedule(
//!     Duration::from_secs(5),
//!     generation,
//!     "reveal-ranking",
//!     command_tx.clone(),
//!     RoomCommand::Timer { generation, kind: TimerKind::RevealRanking },
//! );
//! ```

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, trace};

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Monotonically increasing marker of "which version of the room state
/// this was decided against".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    /// The generation a fresh room starts at.
    pub const INITIAL: Self = Self(0);

    /// Returns the following generation.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Raw counter value, for logs and tests.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ScheduledTask
// ---------------------------------------------------------------------------

/// A message that will be posted to a channel after a delay, unless
/// cancelled first.
///
/// Dropping the task cancels it.
pub struct ScheduledTask {
    label: &'static str,
    generation: Generation,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Arms a task that sends `msg` into `target` after `delay`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<T: Send + 'static>(
        delay: Duration,
        generation: Generation,
        label: &'static str,
        target: mpsc::Sender<T>,
        msg: T,
    ) -> Self {
        debug!(
            timer = label,
            %generation,
            delay_ms = delay.as_millis() as u64,
            "timer armed"
        );

        let handle = tokio::spawn(async move {
            time::sleep(delay).await;
            if target.send(msg).await.is_err() {
                // Receiver gone: the room shut down while we slept.
                trace!(timer = label, %generation, "timer target closed");
            } else {
                trace!(timer = label, %generation, "timer fired");
            }
        });

        Self {
            label,
            generation,
            handle,
        }
    }

    /// Cancels the task. Idempotent; a no-op once it has fired.
    pub fn cancel(&self) {
        if !self.handle.is_finished() {
            self.handle.abort();
            debug!(
                timer = self.label,
                generation = %self.generation,
                "timer cancelled"
            );
        }
    }

    /// `true` once the task has fired or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// The generation this task was armed under.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// The name given at arm time.
    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("label", &self.label)
            .field("generation", &self.generation)
            .field("finished", &self.is_finished())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// TimerSet
// ---------------------------------------------------------------------------

/// The pending timers owned by one room.
#[derive(Debug, Default)]
pub struct TimerSet {
    tasks: Vec<ScheduledTask>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a new task and keeps ownership of it.
    pub fn schedule<T: Send + 'static>(
        &mut self,
        delay: Duration,
        generation: Generation,
        label: &'static str,
        target: mpsc::Sender<T>,
        msg: T,
    ) {
        self.prune_finished();
        self.tasks
            .push(ScheduledTask::spawn(delay, generation, label, target, msg));
    }

    /// Cancels every task armed under a generation other than `current`.
    /// Returns how many were cancelled.
    pub fn retain_generation(&mut self, current: Generation) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|task| {
            if task.generation() == current {
                true
            } else {
                task.cancel();
                false
            }
        });
        before - self.tasks.len()
    }

    /// Cancels everything. Returns how many tasks were still pending.
    pub fn cancel_all(&mut self) -> usize {
        let pending = self.pending();
        for task in self.tasks.drain(..) {
            task.cancel();
        }
        pending
    }

    /// Number of tasks that have neither fired nor been cancelled.
    pub fn pending(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }

    /// `true` when nothing is pending.
    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    fn prune_finished(&mut self) {
        self.tasks.retain(|t| !t.is_finished());
    }
}
