//! Splitting a source into windows or buffers by time and/or count.
//!
//! Windows and buffers share one engine. A partition is either a window
//! (emitted downstream as an observable the moment it opens, completed when
//! it closes) or a buffer (collected values, emitted when it closes).
//!
//! Timing follows [`WindowConfig`]: without a creation interval exactly one
//! partition is open and a fresh one opens whenever it closes; with one, a
//! partition opens at subscribe time and then every interval, each closing
//! `span` after it opened. `max_size` closes a partition early.
//!
//! A partition covers the half-open interval `[opened, opened + span)`: a
//! value arriving exactly at the close time belongs to the next partition,
//! even when the close timer has not fired yet.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;
use std::time::Duration;

use tracing::{trace, warn};

use crate::config::{Config, WindowConfig};
use crate::error::{ConfigError, ConfigResult, StreamError, StreamResult};
use crate::observable::Observable;
use crate::scheduler::{Action, Scheduler};
use crate::subject::Subject;
use crate::subscriber::{Observer, Subscriber};
use crate::subscription::report;

impl<T: Clone + 'static> Observable<T> {
    /// Split the source into windows timed by `config`.
    ///
    /// An invalid configuration errors the result when it is subscribed.
    pub fn window_time(&self, config: WindowConfig, scheduler: &Scheduler) -> Observable<Observable<T>> {
        match Plan::timed(&config, scheduler) {
            Ok(plan) => partitioned::<T, WindowPartition<T>>(self, plan),
            Err(err) => Observable::throw_error(err.into()),
        }
    }

    /// Collect the source into buffers timed by `config`.
    ///
    /// Every buffer is emitted when it closes, empty or not.
    ///
    /// # Example
    ///
    /// ```rust
    /// use rivulet::{Observable, Subject, VirtualTimeScheduler, WindowConfig};
    /// use std::cell::RefCell;
    /// use std::rc::Rc;
    /// use std::time::Duration;
    ///
    /// let vts = VirtualTimeScheduler::new();
    /// let source = Subject::new();
    /// let seen = Rc::new(RefCell::new(Vec::new()));
    /// let s = Rc::clone(&seen);
    ///
    /// source
    ///     .as_observable()
    ///     .buffer_time(WindowConfig::new(Duration::from_millis(100)), &vts.scheduler())
    ///     .subscribe_next(move |batch| s.borrow_mut().push(batch));
    ///
    /// source.next(1);
    /// source.next(2);
    /// vts.advance_to(Duration::from_millis(100));
    /// source.next(3);
    /// source.complete();
    ///
    /// assert_eq!(*seen.borrow(), vec![vec![1, 2], vec![3]]);
    /// ```
    pub fn buffer_time(&self, config: WindowConfig, scheduler: &Scheduler) -> Observable<Vec<T>> {
        match Plan::timed(&config, scheduler) {
            Ok(plan) => partitioned::<T, BufferPartition<T>>(self, plan),
            Err(err) => Observable::throw_error(err.into()),
        }
    }

    /// Emit a buffer every `span`, or as soon as it holds `count` values.
    ///
    /// Filling up restarts the span timer for the next buffer.
    pub fn buffer_time_or_count(
        &self,
        span: Duration,
        count: usize,
        scheduler: &Scheduler,
    ) -> Observable<Vec<T>> {
        self.buffer_time(WindowConfig::new(span).with_max_size(count), scheduler)
    }

    /// Split the source into consecutive windows of `size` values.
    pub fn window_count(&self, size: usize) -> Observable<Observable<T>> {
        match Plan::counted(size) {
            Ok(plan) => partitioned::<T, WindowPartition<T>>(self, plan),
            Err(err) => Observable::throw_error(err.into()),
        }
    }

    /// Collect the source into consecutive buffers of `size` values.
    ///
    /// A final partial buffer is emitted on completion unless it is empty.
    pub fn buffer_count(&self, size: usize) -> Observable<Vec<T>> {
        match Plan::counted(size) {
            Ok(plan) => partitioned::<T, BufferPartition<T>>(self, plan),
            Err(err) => Observable::throw_error(err.into()),
        }
    }
}

#[derive(Debug, Clone)]
struct Plan {
    /// `None` for count-only partitioning.
    span: Option<Duration>,
    creation_interval: Option<Duration>,
    max_size: Option<usize>,
    scheduler: Option<Scheduler>,
}

impl Plan {
    fn timed(config: &WindowConfig, scheduler: &Scheduler) -> ConfigResult<Self> {
        if let Err(err) = config.validate() {
            warn!(config = config.name(), %err, "rejected window configuration");
            return Err(err);
        }
        Ok(Self {
            span: Some(config.span),
            creation_interval: config.creation_interval,
            max_size: config.max_size,
            scheduler: Some(scheduler.clone()),
        })
    }

    fn counted(size: usize) -> ConfigResult<Self> {
        if size == 0 {
            let err = ConfigError::invalid("size", "must be greater than zero");
            warn!(%err, "rejected window size");
            return Err(err);
        }
        Ok(Self {
            span: None,
            creation_interval: None,
            max_size: Some(size),
            scheduler: None,
        })
    }

    /// Whether closing a partition immediately opens the next one.
    fn reopens(&self) -> bool {
        self.creation_interval.is_none()
    }
}

trait Partition<T>: Clone + 'static {
    type Output: 'static;

    fn open() -> Self;
    /// What to emit when the partition opens.
    fn opened(&self) -> Option<Self::Output>;
    fn push(&self, value: T);
    /// What to emit when the partition closes.
    fn close(&self) -> Option<Self::Output>;
    fn fail(&self, err: StreamError);
}

struct WindowPartition<T>(Subject<T>);

impl<T> Clone for WindowPartition<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone + 'static> Partition<T> for WindowPartition<T> {
    type Output = Observable<T>;

    fn open() -> Self {
        Self(Subject::new())
    }

    fn opened(&self) -> Option<Observable<T>> {
        Some(self.0.as_observable())
    }

    fn push(&self, value: T) {
        self.0.next(value);
    }

    fn close(&self) -> Option<Observable<T>> {
        self.0.complete();
        None
    }

    fn fail(&self, err: StreamError) {
        self.0.error(err);
    }
}

struct BufferPartition<T>(Rc<RefCell<Vec<T>>>);

impl<T> Clone for BufferPartition<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: 'static> Partition<T> for BufferPartition<T> {
    type Output = Vec<T>;

    fn open() -> Self {
        Self(Rc::new(RefCell::new(Vec::new())))
    }

    fn opened(&self) -> Option<Vec<T>> {
        None
    }

    fn push(&self, value: T) {
        self.0.borrow_mut().push(value);
    }

    fn close(&self) -> Option<Vec<T>> {
        Some(std::mem::take(&mut *self.0.borrow_mut()))
    }

    fn fail(&self, _err: StreamError) {
        self.0.borrow_mut().clear();
    }
}

struct Slot<P> {
    id: u64,
    partition: P,
    count: usize,
    opened_at: Duration,
    timer: Option<Action<u64>>,
}

struct PartitionState<T, P: Partition<T>> {
    downstream: Subscriber<P::Output>,
    plan: Plan,
    slots: RefCell<Vec<Slot<P>>>,
    next_id: Cell<u64>,
    _marker: PhantomData<fn(T)>,
}

fn partitioned<T, P>(source: &Observable<T>, plan: Plan) -> Observable<P::Output>
where
    T: Clone + 'static,
    P: Partition<T>,
{
    source.lift(move |downstream: Subscriber<P::Output>| -> Subscriber<T> {
        let state = Rc::new(PartitionState::<T, P> {
            downstream,
            plan: plan.clone(),
            slots: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
            _marker: PhantomData,
        });
        state.open();

        if let (Some(interval), Some(scheduler)) = (plan.creation_interval, plan.scheduler.as_ref()) {
            let opener = Rc::clone(&state);
            let creator = scheduler.schedule_periodic(interval, interval, (), move |_, _| opener.open());
            state.downstream.add(&creator);
        }

        Subscriber::new(PartitionObserver { state })
    })
}

impl<T: Clone + 'static, P: Partition<T>> PartitionState<T, P> {
    fn open(self: &Rc<Self>) {
        if self.downstream.is_stopped() {
            return;
        }
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let partition = P::open();
        let opened_at = self.plan.scheduler.as_ref().map_or(Duration::ZERO, Scheduler::now);
        self.slots.borrow_mut().push(Slot {
            id,
            partition: partition.clone(),
            count: 0,
            opened_at,
            timer: None,
        });
        trace!(id, "partition opened");
        if let Some(output) = partition.opened() {
            self.downstream.next(output);
        }

        if let (Some(span), Some(scheduler)) = (self.plan.span, self.plan.scheduler.as_ref()) {
            let state = Rc::clone(self);
            let timer = scheduler.schedule(span, id, move |_, id| state.expire(*id));
            self.downstream.add(&timer);
            if let Some(slot) = self.slots.borrow_mut().iter_mut().find(|slot| slot.id == id) {
                slot.timer = Some(timer);
            }
        }
    }

    fn expire(self: &Rc<Self>, id: u64) {
        if self.close(id) && self.plan.reopens() {
            self.open();
        }
    }

    fn close(&self, id: u64) -> bool {
        let slot = {
            let mut slots = self.slots.borrow_mut();
            match slots.iter().position(|slot| slot.id == id) {
                Some(position) => slots.remove(position),
                None => return false,
            }
        };
        trace!(id, count = slot.count, "partition closed");
        if let Some(timer) = slot.timer {
            report(timer.unsubscribe());
        }
        if let Some(output) = slot.partition.close() {
            self.downstream.next(output);
        }
        true
    }

    /// Close every partition whose span has run out by the scheduler's clock.
    fn expire_elapsed(self: &Rc<Self>) {
        let (Some(span), Some(scheduler)) = (self.plan.span, self.plan.scheduler.as_ref()) else {
            return;
        };
        let now = scheduler.now();
        let elapsed: Vec<u64> = self
            .slots
            .borrow()
            .iter()
            .filter(|slot| slot.opened_at + span <= now)
            .map(|slot| slot.id)
            .collect();
        for id in elapsed {
            self.expire(id);
        }
    }

    fn push(self: &Rc<Self>, value: T) {
        self.expire_elapsed();
        let (targets, full) = {
            let mut slots = self.slots.borrow_mut();
            let mut full = Vec::new();
            let targets: Vec<P> = slots
                .iter_mut()
                .map(|slot| {
                    slot.count += 1;
                    if self.plan.max_size.is_some_and(|max| slot.count >= max) {
                        full.push(slot.id);
                    }
                    slot.partition.clone()
                })
                .collect();
            (targets, full)
        };

        for partition in targets {
            partition.push(value.clone());
        }
        for id in full {
            self.expire(id);
        }
    }

    fn take_slots(&self) -> Vec<Slot<P>> {
        let slots = std::mem::take(&mut *self.slots.borrow_mut());
        for slot in &slots {
            if let Some(timer) = &slot.timer {
                report(timer.unsubscribe());
            }
        }
        slots
    }

    fn complete(&self) {
        let count_only = self.plan.span.is_none();
        for slot in self.take_slots() {
            let output = slot.partition.close();
            if count_only && slot.count == 0 {
                continue;
            }
            if let Some(output) = output {
                self.downstream.next(output);
            }
        }
        self.downstream.complete();
    }

    fn error(&self, err: StreamError) {
        for slot in self.take_slots() {
            slot.partition.fail(err.clone());
        }
        self.downstream.error(err);
    }
}

struct PartitionObserver<T, P: Partition<T>> {
    state: Rc<PartitionState<T, P>>,
}

impl<T: Clone + 'static, P: Partition<T>> Observer<T> for PartitionObserver<T, P> {
    fn next(&mut self, value: T) -> StreamResult<()> {
        self.state.push(value);
        Ok(())
    }

    fn error(&mut self, err: StreamError) {
        self.state.error(err);
    }

    fn complete(&mut self) {
        self.state.complete();
    }
}
