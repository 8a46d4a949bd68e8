//! A scheduler driven by a virtual clock.
//!
//! Nothing runs until the test (or simulation) advances the clock. Actions run
//! in due-time order; actions due at the same instant run in the order they
//! were scheduled. Before each action runs the clock is moved to its due time,
//! so `now()` inside the work reads exactly that time.

use std::time::Duration;

use tracing::debug;

use crate::config::{Config, VirtualTimeConfig};
use crate::error::ConfigResult;
use crate::scheduler::{QueueEntry, Scheduler};

/// Owner of a virtual-time [`Scheduler`].
///
/// # Example
///
/// ```rust
/// use rivulet::VirtualTimeScheduler;
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use std::time::Duration;
///
/// let vts = VirtualTimeScheduler::new();
/// let scheduler = vts.scheduler();
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// for (delay, name) in [(20, "b"), (10, "a"), (20, "c")] {
///     let log = Rc::clone(&log);
///     let s = scheduler.clone();
///     scheduler.schedule(Duration::from_millis(delay), name, move |_, name| {
///         log.borrow_mut().push((s.now().as_millis(), *name));
///     });
/// }
///
/// vts.flush();
/// assert_eq!(*log.borrow(), vec![(10, "a"), (20, "b"), (20, "c")]);
/// ```
#[derive(Debug, Clone)]
pub struct VirtualTimeScheduler {
    scheduler: Scheduler,
    config: VirtualTimeConfig,
}

impl VirtualTimeScheduler {
    /// Create a scheduler that flushes until its queue is empty.
    pub fn new() -> Self {
        Self {
            scheduler: Scheduler::virtual_time(),
            config: VirtualTimeConfig::default(),
        }
    }

    /// Create a scheduler with explicit settings.
    pub fn with_config(config: VirtualTimeConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            scheduler: Scheduler::virtual_time(),
            config,
        })
    }

    pub(crate) fn bounded(max_time: Duration) -> Self {
        Self {
            scheduler: Scheduler::virtual_time(),
            config: VirtualTimeConfig::new().with_max_time(max_time),
        }
    }

    /// The scheduler handle to pass to operators.
    pub fn scheduler(&self) -> Scheduler {
        self.scheduler.clone()
    }

    /// The settings this scheduler was created with.
    pub fn config(&self) -> &VirtualTimeConfig {
        &self.config
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.scheduler.now()
    }

    /// Number of queued entries that will still run.
    ///
    /// Entries of cancelled actions and entries superseded by a later
    /// reschedule are not counted.
    pub fn pending(&self) -> usize {
        self.scheduler
            .virtual_queue()
            .map(|queue| {
                queue
                    .borrow()
                    .entries
                    .values()
                    .filter(|entry| entry.runnable.is_current(entry.ticket))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Run queued actions until the queue is empty or the next one is due
    /// after the configured maximum time.
    pub fn flush(&self) {
        let executed = self.run_while(self.config.max_time);
        debug!(now = ?self.now(), executed, "virtual time flushed");
    }

    /// Run every action due at or before `time`, then set the clock to `time`.
    ///
    /// The clock never moves backwards.
    pub fn advance_to(&self, time: Duration) {
        let executed = self.run_while(Some(time));
        if let Some(queue) = self.scheduler.virtual_queue() {
            let mut queue = queue.borrow_mut();
            queue.now = queue.now.max(time);
        }
        debug!(now = ?self.now(), executed, "virtual time advanced");
    }

    /// Advance the clock by `delta`, running everything that falls due.
    pub fn advance_by(&self, delta: Duration) {
        self.advance_to(self.now() + delta);
    }

    fn run_while(&self, limit: Option<Duration>) -> usize {
        let mut executed = 0;
        while let Some(entry) = self.pop_due(limit) {
            if !entry.runnable.is_current(entry.ticket) {
                continue;
            }
            entry.runnable.run(entry.ticket);
            executed += 1;
        }
        executed
    }

    fn pop_due(&self, limit: Option<Duration>) -> Option<QueueEntry> {
        let mut queue = self.scheduler.virtual_queue()?.borrow_mut();
        let (&(due, seq), _) = queue.entries.first_key_value()?;
        if limit.is_some_and(|limit| due > limit) {
            return None;
        }
        let entry = queue.entries.remove(&(due, seq))?;
        if entry.runnable.is_current(entry.ticket) {
            queue.now = queue.now.max(due);
        }
        Some(entry)
    }
}

impl Default for VirtualTimeScheduler {
    fn default() -> Self {
        Self::new()
    }
}
