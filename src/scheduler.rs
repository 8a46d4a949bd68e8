//! Schedulers and the cancellable actions they run.
//!
//! A [`Scheduler`] pairs a clock with an execution policy. The policy is a
//! value, not a separate type hierarchy, so production scheduling and
//! virtual-time testing share one [`Action`] model:
//!
//! | Policy        | zero delay                     | positive delay                      |
//! |---------------|--------------------------------|-------------------------------------|
//! | `Immediate`   | runs inline, trampolined       | blocks the calling thread, then runs |
//! | `Async`       | next turn of the tokio LocalSet | `tokio::time::sleep`, then runs      |
//! | `VirtualTime` | queued at the current instant  | queued at `now + delay`              |
//!
//! Work scheduled on an immediate scheduler while another of its actions is
//! running is queued and run by the outermost call once the running work
//! returns, so self-rescheduling actions use constant stack.
//!
//! Schedulers are constructed explicitly and passed to whatever needs them;
//! there is no process-wide default.
//!
//! An [`Action`] owns a [`Subscription`]: unsubscribing it before it is due
//! means it never runs, and unsubscribing it while it runs prevents any
//! reschedule.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

use crate::error::UnsubscriptionError;
use crate::subscription::{report, Subscription, Teardown};

/// How a scheduler executes its actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPolicy {
    /// Synchronously on the calling stack.
    Immediate,
    /// As tokio tasks on the current `LocalSet`.
    Async,
    /// In (due time, insertion order) on a manually advanced virtual clock.
    VirtualTime,
}

/// Work that a scheduler queue can hold without knowing its state type.
pub(crate) trait Runnable {
    fn run(self: Rc<Self>, ticket: u64);
    /// Whether a queue entry holding `ticket` would still run.
    fn is_current(&self, ticket: u64) -> bool;
    fn set_task(&self, handle: JoinHandle<()>);
}

pub(crate) struct QueueEntry {
    pub(crate) runnable: Rc<dyn Runnable>,
    pub(crate) ticket: u64,
}

/// Pending work of a virtual-time scheduler, ordered by (due, insertion).
pub(crate) struct VirtualQueue {
    pub(crate) now: Duration,
    seq: u64,
    pub(crate) entries: BTreeMap<(Duration, u64), QueueEntry>,
}

/// Trampoline of an immediate scheduler.
struct ImmediateQueue {
    epoch: std::time::Instant,
    pending: RefCell<VecDeque<QueueEntry>>,
    draining: Cell<bool>,
}

impl ImmediateQueue {
    fn drain(&self) {
        if self.draining.replace(true) {
            return;
        }
        let _reset = DrainGuard(&self.draining);
        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some(entry) = next else {
                break;
            };
            entry.runnable.run(entry.ticket);
        }
    }
}

struct DrainGuard<'a>(&'a Cell<bool>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

enum Clock {
    Immediate(ImmediateQueue),
    Async(tokio::time::Instant),
    Virtual(RefCell<VirtualQueue>),
}

struct Inner {
    clock: Clock,
}

/// A handle to a scheduler. Clones share the same clock and queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

impl Scheduler {
    /// A scheduler that runs work on the calling stack.
    pub fn immediate() -> Self {
        Self::with_clock(Clock::Immediate(ImmediateQueue {
            epoch: std::time::Instant::now(),
            pending: RefCell::new(VecDeque::new()),
            draining: Cell::new(false),
        }))
    }

    /// A scheduler that runs work as tokio tasks spawned with `spawn_local`.
    ///
    /// Scheduling through it must happen inside a `tokio::task::LocalSet`.
    pub fn async_local() -> Self {
        Self::with_clock(Clock::Async(tokio::time::Instant::now()))
    }

    pub(crate) fn virtual_time() -> Self {
        Self::with_clock(Clock::Virtual(RefCell::new(VirtualQueue {
            now: Duration::ZERO,
            seq: 0,
            entries: BTreeMap::new(),
        })))
    }

    fn with_clock(clock: Clock) -> Self {
        Self {
            inner: Rc::new(Inner { clock }),
        }
    }

    /// The execution policy of this scheduler.
    pub fn policy(&self) -> SchedulerPolicy {
        match self.inner.clock {
            Clock::Immediate(_) => SchedulerPolicy::Immediate,
            Clock::Async(_) => SchedulerPolicy::Async,
            Clock::Virtual(_) => SchedulerPolicy::VirtualTime,
        }
    }

    /// Time elapsed since this scheduler was created, on its own clock.
    pub fn now(&self) -> Duration {
        match &self.inner.clock {
            Clock::Immediate(queue) => queue.epoch.elapsed(),
            Clock::Async(epoch) => tokio::time::Instant::now().duration_since(*epoch),
            Clock::Virtual(queue) => queue.borrow().now,
        }
    }

    /// Schedule `work` to run once after `delay` with `state`.
    ///
    /// The work receives its own [`Action`] and may reschedule it.
    ///
    /// # Example
    ///
    /// ```rust
    /// use rivulet::Scheduler;
    /// use std::time::Duration;
    ///
    /// let scheduler = Scheduler::immediate();
    /// let action = scheduler.schedule(Duration::ZERO, 0u32, |action, count| {
    ///     *count += 1;
    ///     if *count < 3 {
    ///         action.schedule(Duration::ZERO);
    ///     }
    /// });
    /// assert!(action.is_closed());
    /// ```
    pub fn schedule<S: 'static>(
        &self,
        delay: Duration,
        state: S,
        work: impl FnMut(&Action<S>, &mut S) + 'static,
    ) -> Action<S> {
        let action = Action::new(self, state, Box::new(work), None);
        action.inner.enqueue(delay);
        action
    }

    /// Schedule `work` to run after `delay` and then every `period`.
    pub fn schedule_periodic<S: 'static>(
        &self,
        delay: Duration,
        period: Duration,
        state: S,
        work: impl FnMut(&Action<S>, &mut S) + 'static,
    ) -> Action<S> {
        let action = Action::new(self, state, Box::new(work), Some(period));
        action.inner.enqueue(delay);
        action
    }

    fn enqueue(&self, runnable: Rc<dyn Runnable>, ticket: u64, delay: Duration) -> Duration {
        match &self.inner.clock {
            Clock::Immediate(queue) => {
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                let due = queue.epoch.elapsed();
                queue.pending.borrow_mut().push_back(QueueEntry { runnable, ticket });
                queue.drain();
                due
            }
            Clock::Async(epoch) => {
                let task = Rc::clone(&runnable);
                let handle = tokio::task::spawn_local(async move {
                    tokio::time::sleep(delay).await;
                    task.run(ticket);
                });
                runnable.set_task(handle);
                tokio::time::Instant::now().duration_since(*epoch) + delay
            }
            Clock::Virtual(queue) => {
                let mut queue = queue.borrow_mut();
                let due = queue.now + delay;
                let seq = queue.seq;
                queue.seq += 1;
                queue.entries.insert((due, seq), QueueEntry { runnable, ticket });
                due
            }
        }
    }

    pub(crate) fn virtual_queue(&self) -> Option<&RefCell<VirtualQueue>> {
        match &self.inner.clock {
            Clock::Virtual(queue) => Some(queue),
            _ => None,
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("policy", &self.policy())
            .field("now", &self.now())
            .finish()
    }
}

type Work<S> = Box<dyn FnMut(&Action<S>, &mut S)>;

struct ActionInner<S> {
    subscription: Subscription,
    scheduler: Weak<Inner>,
    work: RefCell<Option<Work<S>>>,
    state: RefCell<Option<S>>,
    period: Option<Duration>,
    due: Cell<Duration>,
    ticket: Cell<u64>,
    executing: Cell<bool>,
    reschedule: Cell<Option<Duration>>,
    replacement: RefCell<Option<S>>,
    task: RefCell<Option<JoinHandle<()>>>,
}

/// One unit of scheduled, cancellable work.
///
/// Cloning yields another handle to the same action.
pub struct Action<S> {
    inner: Rc<ActionInner<S>>,
}

impl<S: 'static> Action<S> {
    fn new(scheduler: &Scheduler, state: S, work: Work<S>, period: Option<Duration>) -> Self {
        let inner = Rc::new(ActionInner {
            subscription: Subscription::new(),
            scheduler: Rc::downgrade(&scheduler.inner),
            work: RefCell::new(Some(work)),
            state: RefCell::new(Some(state)),
            period,
            due: Cell::new(Duration::ZERO),
            ticket: Cell::new(0),
            executing: Cell::new(false),
            reschedule: Cell::new(None),
            replacement: RefCell::new(None),
            task: RefCell::new(None),
        });

        let weak = Rc::downgrade(&inner);
        inner.subscription.add(Teardown::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.release();
            }
        }));

        Self { inner }
    }

    /// Run this action again after `delay`, keeping its current state.
    ///
    /// Called from inside the work, the reschedule takes effect once the
    /// current run returns. Has no effect once the action is closed.
    pub fn schedule(&self, delay: Duration) {
        if self.inner.subscription.is_closed() {
            return;
        }
        if self.inner.executing.get() {
            self.inner.reschedule.set(Some(delay));
        } else {
            self.inner.enqueue(delay);
        }
    }

    /// Run this action again after `delay` with a new state.
    pub fn schedule_with(&self, state: S, delay: Duration) {
        if self.inner.subscription.is_closed() {
            return;
        }
        if self.inner.executing.get() {
            *self.inner.replacement.borrow_mut() = Some(state);
        } else {
            *self.inner.state.borrow_mut() = Some(state);
        }
        self.schedule(delay);
    }
}

impl<S> Action<S> {
    /// Cancel this action.
    pub fn unsubscribe(&self) -> Result<(), UnsubscriptionError> {
        self.inner.subscription.unsubscribe()
    }

    /// Whether this action was cancelled or has finished.
    pub fn is_closed(&self) -> bool {
        self.inner.subscription.is_closed()
    }

    /// The subscription that cancels this action.
    pub fn subscription(&self) -> &Subscription {
        &self.inner.subscription
    }

    /// The scheduler time this action is next due at.
    pub fn due(&self) -> Duration {
        self.inner.due.get()
    }
}

impl<S> Clone for Action<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for Action<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("due", &self.inner.due.get())
            .field("period", &self.inner.period)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<S> From<&Action<S>> for Teardown {
    fn from(action: &Action<S>) -> Self {
        Teardown::Subscription(action.inner.subscription.clone())
    }
}

impl<S: 'static> ActionInner<S> {
    fn enqueue(self: &Rc<Self>, delay: Duration) {
        let Some(scheduler) = self.scheduler.upgrade().map(|inner| Scheduler { inner }) else {
            trace!("scheduler dropped, action discarded");
            return;
        };
        let ticket = self.ticket.get() + 1;
        self.ticket.set(ticket);
        trace!(?delay, ticket, policy = ?scheduler.policy(), "action scheduled");
        let runnable: Rc<dyn Runnable> = Rc::clone(self) as Rc<dyn Runnable>;
        let due = scheduler.enqueue(runnable, ticket, delay);
        if !self.executing.get() {
            self.due.set(due);
        }
    }

    fn release(&self) {
        if let Some(task) = self.task.borrow_mut().take() {
            task.abort();
        }
        let work = self.work.try_borrow_mut().ok().and_then(|mut w| w.take());
        let state = self.state.try_borrow_mut().ok().and_then(|mut s| s.take());
        let replacement = self.replacement.try_borrow_mut().ok().and_then(|mut s| s.take());
        drop((work, state, replacement));
    }
}

impl<S: 'static> Runnable for ActionInner<S> {
    fn run(self: Rc<Self>, ticket: u64) {
        if self.subscription.is_closed() || ticket != self.ticket.get() {
            return;
        }
        self.task.borrow_mut().take();

        let work = self.work.borrow_mut().take();
        let state = self.state.borrow_mut().take();
        let (Some(mut work), Some(mut state)) = (work, state) else {
            return;
        };

        let action = Action {
            inner: Rc::clone(&self),
        };
        trace!(due = ?self.due.get(), ticket, "action executing");
        self.executing.set(true);
        work(&action, &mut state);
        self.executing.set(false);

        if self.subscription.is_closed() {
            return;
        }

        let state = self.replacement.borrow_mut().take().unwrap_or(state);
        *self.work.borrow_mut() = Some(work);
        *self.state.borrow_mut() = Some(state);

        match self.reschedule.take().or(self.period) {
            Some(delay) => self.enqueue(delay),
            None => report(self.subscription.unsubscribe()),
        }
    }

    fn is_current(&self, ticket: u64) -> bool {
        !self.subscription.is_closed() && ticket == self.ticket.get()
    }

    fn set_task(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.task.borrow_mut().replace(handle) {
            previous.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_runs_inline() {
        let scheduler = Scheduler::immediate();
        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        let action = scheduler.schedule(Duration::ZERO, (), move |_, _| r.set(true));

        assert!(ran.get());
        assert!(action.is_closed());
        assert_eq!(scheduler.policy(), SchedulerPolicy::Immediate);
    }

    #[test]
    fn test_immediate_reschedule_keeps_state() {
        let scheduler = Scheduler::immediate();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        scheduler.schedule(Duration::ZERO, 0u32, move |action, n| {
            s.borrow_mut().push(*n);
            if *n < 3 {
                action.schedule_with(*n + 1, Duration::ZERO);
            }
        });

        assert_eq!(*seen.borrow(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_immediate_reschedule_uses_constant_stack() {
        let scheduler = Scheduler::immediate();
        let runs = Rc::new(Cell::new(0u32));
        let r = Rc::clone(&runs);
        let action = scheduler.schedule(Duration::ZERO, 0u32, move |action, n| {
            *n += 1;
            r.set(*n);
            if *n < 100_000 {
                action.schedule(Duration::ZERO);
            }
        });

        assert_eq!(runs.get(), 100_000);
        assert!(action.is_closed());
    }

    #[test]
    fn test_immediate_nested_schedule_runs_after_current_work() {
        let scheduler = Scheduler::immediate();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let inner_scheduler = scheduler.clone();
        scheduler.schedule(Duration::ZERO, (), move |_, _| {
            l.borrow_mut().push("outer start");
            let l2 = Rc::clone(&l);
            inner_scheduler.schedule(Duration::ZERO, (), move |_, _| l2.borrow_mut().push("inner"));
            l.borrow_mut().push("outer end");
        });

        assert_eq!(*log.borrow(), vec!["outer start", "outer end", "inner"]);
    }

    #[test]
    fn test_unsubscribe_during_execution_prevents_reschedule() {
        let scheduler = Scheduler::immediate();
        let runs = Rc::new(Cell::new(0));
        let r = Rc::clone(&runs);
        let action = scheduler.schedule(Duration::ZERO, (), move |action, _| {
            r.set(r.get() + 1);
            action.schedule(Duration::ZERO);
            action.unsubscribe().unwrap();
        });

        assert_eq!(runs.get(), 1);
        assert!(action.is_closed());
    }

    #[test]
    fn test_action_as_teardown() {
        let scheduler = Scheduler::virtual_time();
        let parent = Subscription::new();
        let action = scheduler.schedule(Duration::from_millis(5), (), |_, _| {});
        parent.add(&action);

        parent.unsubscribe().unwrap();
        assert!(action.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_runs_after_delay() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let scheduler = Scheduler::async_local();
                let ran = Rc::new(Cell::new(false));
                let r = Rc::clone(&ran);
                scheduler.schedule(Duration::from_millis(50), (), move |_, _| r.set(true));

                tokio::time::sleep(Duration::from_millis(20)).await;
                assert!(!ran.get());
                tokio::time::sleep(Duration::from_millis(40)).await;
                assert!(ran.get());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_cancelled_action_never_runs() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let scheduler = Scheduler::async_local();
                let ran = Rc::new(Cell::new(false));
                let r = Rc::clone(&ran);
                let action =
                    scheduler.schedule(Duration::from_millis(50), (), move |_, _| r.set(true));

                action.unsubscribe().unwrap();
                tokio::time::sleep(Duration::from_millis(100)).await;
                assert!(!ran.get());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_periodic() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let scheduler = Scheduler::async_local();
                let ticks = Rc::new(Cell::new(0));
                let t = Rc::clone(&ticks);
                let action = scheduler.schedule_periodic(
                    Duration::from_millis(10),
                    Duration::from_millis(10),
                    (),
                    move |_, _| t.set(t.get() + 1),
                );

                tokio::time::sleep(Duration::from_millis(35)).await;
                action.unsubscribe().unwrap();
                let seen = ticks.get();
                assert_eq!(seen, 3);

                tokio::time::sleep(Duration::from_millis(50)).await;
                assert_eq!(ticks.get(), seen);
            })
            .await;
    }
}
