//! Flattening a stream of streams, with bounded concurrency.
//!
//! Every operator here shares one engine: inner sources wait in a buffer
//! and a drain loop subscribes them while fewer than `concurrency` are
//! active. An inner that completes during the drain only frees its slot, and
//! the loop already running picks up the next one, so long runs of
//! synchronous inners use constant stack.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::debug;

use crate::error::{StreamError, StreamResult};
use crate::observable::Observable;
use crate::subscriber::{Observer, Subscriber};

/// Concurrency limit meaning "subscribe every inner source immediately".
pub const UNBOUNDED: usize = usize::MAX;

fn clamp_concurrency(concurrency: usize) -> usize {
    if concurrency == 0 {
        debug!(requested = concurrency, "merge concurrency clamped to 1");
        1
    } else {
        concurrency
    }
}

impl<T: 'static> Observable<Observable<T>> {
    /// Subscribe to up to `concurrency` inner sources at a time and forward
    /// their values as they arrive.
    ///
    /// Inner sources beyond the limit wait in arrival order. The result
    /// completes once the outer source and every inner source have completed;
    /// the first error from any of them ends everything.
    pub fn merge_all(&self, concurrency: usize) -> Observable<T> {
        let concurrency = clamp_concurrency(concurrency);
        self.lift(move |downstream: Subscriber<T>| -> Subscriber<Observable<T>> {
            let state = MergeState::new(downstream, concurrency, Box::new(|state, value| {
                state.downstream.next(value);
            }));
            Subscriber::new(OuterObserver { state })
        })
    }

    /// Subscribe to inner sources one after another.
    pub fn concat_all(&self) -> Observable<T> {
        self.merge_all(1)
    }
}

impl<T: 'static> Observable<T> {
    /// Merge every source, all subscribed at once.
    pub fn merge(sources: Vec<Observable<T>>) -> Observable<T> {
        Observable::of(sources).merge_all(UNBOUNDED)
    }

    /// Emit every value of each source in turn, starting the next source only
    /// after the previous one completes.
    ///
    /// # Example
    ///
    /// ```rust
    /// use rivulet::Observable;
    /// use std::cell::RefCell;
    /// use std::rc::Rc;
    ///
    /// let seen = Rc::new(RefCell::new(Vec::new()));
    /// let s = Rc::clone(&seen);
    /// Observable::concat(vec![Observable::of(vec![1, 2]), Observable::of(vec![3])])
    ///     .subscribe_next(move |v| s.borrow_mut().push(v));
    /// assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    /// ```
    pub fn concat(sources: Vec<Observable<T>>) -> Observable<T> {
        Observable::of(sources).concat_all()
    }

    /// Merge this source with `other`.
    pub fn merge_with(&self, other: &Observable<T>) -> Observable<T> {
        Observable::merge(vec![self.clone(), other.clone()])
    }

    /// Continue with `other` once this source completes.
    pub fn concat_with(&self, other: &Observable<T>) -> Observable<T> {
        Observable::concat(vec![self.clone(), other.clone()])
    }

    /// Project each value to an inner source and merge them.
    pub fn merge_map<U: 'static>(
        &self,
        project: impl Fn(T) -> Observable<U> + 'static,
        concurrency: usize,
    ) -> Observable<U> {
        self.map(project).merge_all(concurrency)
    }

    /// Project each value to an inner source and concatenate them.
    pub fn concat_map<U: 'static>(
        &self,
        project: impl Fn(T) -> Observable<U> + 'static,
    ) -> Observable<U> {
        self.map(project).concat_all()
    }
}

impl<T: Clone + 'static> Observable<T> {
    /// Emit every value and feed it back through `project`, recursively.
    ///
    /// Each value, whether from the source or from a projected inner source,
    /// is emitted and then projected to a new inner source. At most
    /// `concurrency` inner sources are subscribed at a time. The result
    /// completes once the source and every projected source have completed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use rivulet::{Observable, UNBOUNDED};
    /// use std::cell::RefCell;
    /// use std::rc::Rc;
    ///
    /// let seen = Rc::new(RefCell::new(Vec::new()));
    /// let s = Rc::clone(&seen);
    /// Observable::of(vec![1])
    ///     .expand(
    ///         |x| if x < 16 { Observable::of(vec![x * 2]) } else { Observable::empty() },
    ///         UNBOUNDED,
    ///     )
    ///     .subscribe_next(move |v| s.borrow_mut().push(v));
    /// assert_eq!(*seen.borrow(), vec![1, 2, 4, 8, 16]);
    /// ```
    pub fn expand(
        &self,
        project: impl Fn(T) -> Observable<T> + 'static,
        concurrency: usize,
    ) -> Observable<T> {
        let concurrency = clamp_concurrency(concurrency);
        let project = Rc::new(project);
        self.lift(move |downstream: Subscriber<T>| -> Subscriber<T> {
            let project = Rc::clone(&project);
            let state = MergeState::new(downstream, concurrency, Box::new(move |state, value: T| {
                state.downstream.next(value.clone());
                if !state.downstream.is_stopped() {
                    state.enqueue(project(value));
                }
            }));
            Subscriber::new(InnerObserver {
                state,
                is_source: true,
            })
        })
    }
}

type OnValue<T> = Box<dyn Fn(&Rc<MergeState<T>>, T)>;

struct MergeState<T> {
    downstream: Subscriber<T>,
    concurrency: usize,
    active: Cell<usize>,
    buffer: RefCell<VecDeque<Observable<T>>>,
    has_completed: Cell<bool>,
    draining: Cell<bool>,
    /// What an inner value does: forwarded, or forwarded and expanded.
    on_value: OnValue<T>,
}

impl<T: 'static> MergeState<T> {
    fn new(downstream: Subscriber<T>, concurrency: usize, on_value: OnValue<T>) -> Rc<Self> {
        Rc::new(Self {
            downstream,
            concurrency,
            active: Cell::new(0),
            buffer: RefCell::new(VecDeque::new()),
            has_completed: Cell::new(false),
            draining: Cell::new(false),
            on_value,
        })
    }

    fn enqueue(self: &Rc<Self>, inner: Observable<T>) {
        self.buffer.borrow_mut().push_back(inner);
        self.drain();
    }

    /// Subscribe buffered inners while there is room. Re-entrant calls return
    /// at once; the outermost loop sees the slots they freed.
    fn drain(self: &Rc<Self>) {
        if self.draining.replace(true) {
            return;
        }
        while !self.downstream.is_closed() && self.active.get() < self.concurrency {
            let next = self.buffer.borrow_mut().pop_front();
            let Some(inner) = next else {
                break;
            };
            self.subscribe_inner(inner);
        }
        self.draining.set(false);
        self.complete_if_done();
    }

    fn subscribe_inner(self: &Rc<Self>, inner: Observable<T>) {
        self.active.set(self.active.get() + 1);
        let subscriber = Subscriber::new(InnerObserver {
            state: Rc::clone(self),
            is_source: false,
        });
        // Owned by the downstream: the outer source finishing must not end it.
        self.downstream.add(&subscriber);
        inner.subscribe_with(subscriber);
    }

    fn inner_completed(self: &Rc<Self>) {
        self.active.set(self.active.get() - 1);
        self.drain();
    }

    fn source_completed(&self) {
        self.has_completed.set(true);
        self.complete_if_done();
    }

    fn complete_if_done(&self) {
        if self.has_completed.get()
            && !self.draining.get()
            && self.active.get() == 0
            && self.buffer.borrow().is_empty()
        {
            self.downstream.complete();
        }
    }
}

struct OuterObserver<T> {
    state: Rc<MergeState<T>>,
}

impl<T: 'static> Observer<Observable<T>> for OuterObserver<T> {
    fn next(&mut self, inner: Observable<T>) -> StreamResult<()> {
        self.state.enqueue(inner);
        Ok(())
    }

    fn error(&mut self, err: StreamError) {
        self.state.downstream.error(err);
    }

    fn complete(&mut self) {
        self.state.source_completed();
    }
}

/// Observer of an inner source, or of the source itself for `expand`.
struct InnerObserver<T> {
    state: Rc<MergeState<T>>,
    is_source: bool,
}

impl<T: 'static> Observer<T> for InnerObserver<T> {
    fn next(&mut self, value: T) -> StreamResult<()> {
        (self.state.on_value)(&self.state, value);
        Ok(())
    }

    fn error(&mut self, err: StreamError) {
        self.state.downstream.error(err);
    }

    fn complete(&mut self) {
        if self.is_source {
            self.state.source_completed();
        } else {
            self.state.inner_completed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::Notification;
    use crate::subject::Subject;
    use crate::subscriber::FnObserver;

    fn record<T: Clone + 'static>(source: &Observable<T>) -> Rc<RefCell<Vec<Notification<T>>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (l1, l2, l3) = (Rc::clone(&log), Rc::clone(&log), Rc::clone(&log));
        source.subscribe(
            FnObserver::new()
                .on_next(move |v| l1.borrow_mut().push(Notification::Next(v)))
                .on_error(move |e| l2.borrow_mut().push(Notification::Error(e)))
                .on_complete(move || l3.borrow_mut().push(Notification::Complete)),
        );
        log
    }

    #[test]
    fn test_concat_waits_for_previous_inner() {
        let a = Subject::new();
        let b = Subject::new();
        let b_subscribed = Rc::new(Cell::new(false));
        let flag = Rc::clone(&b_subscribed);
        let b_source = b.as_observable();
        let lazy_b = Observable::new(move |subscriber| {
            flag.set(true);
            b_source.subscribe_with(subscriber);
        });

        let log = record(&Observable::concat(vec![a.as_observable(), lazy_b]));
        a.next('a');
        assert!(!b_subscribed.get());
        b.next('x');
        a.complete();
        assert!(b_subscribed.get());
        b.next('b');
        b.complete();

        assert_eq!(
            *log.borrow(),
            vec![
                Notification::Next('a'),
                Notification::Next('b'),
                Notification::Complete
            ]
        );
    }

    #[test]
    fn test_merge_all_respects_concurrency() {
        let subjects: Vec<Subject<i32>> = (0..3).map(|_| Subject::new()).collect();
        let outer = Subject::new();
        let log = record(&outer.as_observable().merge_all(2));

        for s in &subjects {
            outer.next(s.as_observable());
        }
        assert_eq!(subjects[0].observer_count(), 1);
        assert_eq!(subjects[1].observer_count(), 1);
        assert_eq!(subjects[2].observer_count(), 0);

        subjects[0].complete();
        assert_eq!(subjects[2].observer_count(), 1);

        outer.complete();
        subjects[2].next(7);
        subjects[1].complete();
        assert!(!log.borrow().contains(&Notification::Complete));
        subjects[2].complete();

        assert_eq!(
            *log.borrow(),
            vec![Notification::Next(7), Notification::Complete]
        );
    }

    #[test]
    fn test_zero_concurrency_is_clamped_to_serial() {
        let log = record(
            &Observable::of(vec![Observable::of(vec![1, 2]), Observable::of(vec![3])]).merge_all(0),
        );
        assert_eq!(
            *log.borrow(),
            vec![
                Notification::Next(1),
                Notification::Next(2),
                Notification::Next(3),
                Notification::Complete
            ]
        );
    }

    #[test]
    fn test_first_error_tears_down_active_inners() {
        let a = Subject::<i32>::new();
        let b = Subject::<i32>::new();
        let log = record(&a.as_observable().merge_with(&b.as_observable()));

        a.next(1);
        b.error(StreamError::message("boom"));
        a.next(2);

        assert_eq!(a.observer_count(), 0);
        assert_eq!(
            *log.borrow(),
            vec![
                Notification::Next(1),
                Notification::Error(StreamError::message("boom"))
            ]
        );
    }

    #[test]
    fn test_merge_map_and_concat_map() {
        let merged = record(&Observable::of(vec![1, 2]).merge_map(|x| Observable::of(vec![x, x * 10]), UNBOUNDED));
        assert_eq!(
            *merged.borrow(),
            vec![
                Notification::Next(1),
                Notification::Next(10),
                Notification::Next(2),
                Notification::Next(20),
                Notification::Complete
            ]
        );

        let concatenated = record(&Observable::of(vec!["a", "b"]).concat_map(|s| Observable::of(vec![s; 2])));
        assert_eq!(concatenated.borrow().len(), 5);
    }

    #[test]
    fn test_outer_completion_keeps_inner_alive() {
        let inner = Subject::new();
        let log = record(&Observable::of(vec![inner.as_observable()]).merge_all(UNBOUNDED));

        inner.next(5);
        inner.complete();

        assert_eq!(
            *log.borrow(),
            vec![Notification::Next(5), Notification::Complete]
        );
    }

    #[test]
    fn test_unsubscribe_releases_inners_and_buffer() {
        let a = Subject::<i32>::new();
        let outer = Subject::new();
        let subscription = outer
            .as_observable()
            .concat_all()
            .subscribe_next(|_| {});
        outer.next(a.as_observable());
        outer.next(Observable::never());

        subscription.unsubscribe().unwrap();
        assert_eq!(a.observer_count(), 0);
        assert_eq!(outer.observer_count(), 0);
    }

    #[test]
    fn test_concat_of_many_synchronous_sources_uses_constant_stack() {
        let first = Subject::new();
        let mut sources = vec![first.as_observable()];
        sources.extend((0..10_000).map(|i| Observable::of(vec![i])));

        let log = record(&Observable::concat(sources));
        first.complete();

        let log = log.borrow();
        assert_eq!(log.len(), 10_001);
        assert_eq!(log[0], Notification::Next(0));
        assert_eq!(log[9_999], Notification::Next(9_999));
        assert_eq!(log[10_000], Notification::Complete);
    }

    #[test]
    fn test_expand_synchronous_projection() {
        let source = Observable::of(vec![1]);
        let log = record(&source.expand(
            |x| {
                if x == 16 {
                    Observable::empty()
                } else {
                    Observable::of(vec![x * 2])
                }
            },
            UNBOUNDED,
        ));

        assert_eq!(
            *log.borrow(),
            vec![
                Notification::Next(1),
                Notification::Next(2),
                Notification::Next(4),
                Notification::Next(8),
                Notification::Next(16),
                Notification::Complete
            ]
        );
    }

    #[test]
    fn test_expand_respects_concurrency() {
        let inners: Rc<RefCell<Vec<Subject<u32>>>> = Rc::new(RefCell::new(Vec::new()));
        let created = Rc::clone(&inners);
        let source = Subject::new();
        let log = record(&source.as_observable().expand(
            move |x| {
                if x >= 10 {
                    return Observable::empty();
                }
                let inner = Subject::new();
                created.borrow_mut().push(inner.clone());
                inner.as_observable()
            },
            1,
        ));

        source.next(1);
        source.next(2);
        assert_eq!(inners.borrow().len(), 2);
        let first = inners.borrow()[0].clone();
        let second = inners.borrow()[1].clone();
        assert_eq!(first.observer_count(), 1);
        assert_eq!(second.observer_count(), 0);

        source.complete();
        first.next(10);
        first.complete();
        assert_eq!(second.observer_count(), 1);
        second.complete();

        assert_eq!(
            *log.borrow(),
            vec![
                Notification::Next(1),
                Notification::Next(2),
                Notification::Next(10),
                Notification::Complete
            ]
        );
    }
}
