//! Lazy, re-subscribable stream templates and operator lifting.
//!
//! An [`Observable`] is a producer function behind an `Rc`. Nothing runs until
//! `subscribe` is called, and every call runs the producer afresh with a new
//! [`Subscriber`]; separate subscriptions share no mutable state.
//!
//! [`Observable::lift`] attaches an [`Operator`] without subscribing anything:
//! at subscribe time the operator wraps the downstream subscriber into an
//! upstream one, which is then handed to the source. Chains are therefore pure
//! wrapping, and the subscription tree built on the way mirrors the chain.

use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::error::{StreamError, StreamResult};
use crate::subscriber::{FnObserver, Observer, Subscriber};
use crate::subscription::{Subscription, Teardown};

type Producer<T> = dyn Fn(Subscriber<T>) -> StreamResult<Teardown>;

/// Wraps a downstream subscriber into the subscriber its source should feed.
///
/// `call` runs once per subscription, before the source is subscribed. Any
/// `Fn(Subscriber<U>) -> Subscriber<T>` closure is an operator.
pub trait Operator<T, U> {
    /// Produce the upstream subscriber for `downstream`.
    fn call(&self, downstream: Subscriber<U>) -> Subscriber<T>;
}

impl<T, U, F> Operator<T, U> for F
where
    F: Fn(Subscriber<U>) -> Subscriber<T>,
{
    fn call(&self, downstream: Subscriber<U>) -> Subscriber<T> {
        self(downstream)
    }
}

/// A lazy description of a push-based sequence.
pub struct Observable<T> {
    producer: Rc<Producer<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            producer: Rc::clone(&self.producer),
        }
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable").finish_non_exhaustive()
    }
}

impl<T: 'static> Observable<T> {
    /// Create an observable from a producer that needs no teardown.
    ///
    /// # Example
    ///
    /// ```rust
    /// use rivulet::Observable;
    /// use std::cell::RefCell;
    /// use std::rc::Rc;
    ///
    /// let source = Observable::new(|subscriber| {
    ///     subscriber.next(1);
    ///     subscriber.next(2);
    ///     subscriber.complete();
    /// });
    ///
    /// let seen = Rc::new(RefCell::new(Vec::new()));
    /// let s = Rc::clone(&seen);
    /// source.subscribe_next(move |v| s.borrow_mut().push(v));
    /// assert_eq!(*seen.borrow(), vec![1, 2]);
    /// ```
    pub fn new(producer: impl Fn(Subscriber<T>) + 'static) -> Self {
        Self::try_create(move |subscriber| {
            producer(subscriber);
            Ok(Teardown::Empty)
        })
    }

    /// Create an observable whose producer returns a teardown.
    ///
    /// The teardown is attached to the subscriber the producer was given, so
    /// it runs when that subscription ends for any reason.
    pub fn create(producer: impl Fn(Subscriber<T>) -> Teardown + 'static) -> Self {
        Self::try_create(move |subscriber| Ok(producer(subscriber)))
    }

    /// Create an observable whose producer may fail synchronously.
    ///
    /// A producer `Err` is delivered as the subscriber's error notification.
    pub fn try_create(producer: impl Fn(Subscriber<T>) -> StreamResult<Teardown> + 'static) -> Self {
        Self {
            producer: Rc::new(producer),
        }
    }

    /// Subscribe an observer, returning the subscription that ends it.
    pub fn subscribe(&self, observer: impl Observer<T> + 'static) -> Subscription {
        self.subscribe_with(Subscriber::new(observer))
    }

    /// Subscribe a value handler only.
    pub fn subscribe_next(&self, f: impl FnMut(T) + 'static) -> Subscription {
        self.subscribe(FnObserver::new().on_next(f))
    }

    /// Run the producer against an existing subscriber.
    pub fn subscribe_with(&self, subscriber: Subscriber<T>) -> Subscription {
        let subscription = subscriber.subscription().clone();
        match (self.producer)(subscriber.clone()) {
            Ok(teardown) => subscriber.add(teardown),
            Err(err) => subscriber.error(err),
        }
        subscription
    }

    /// Attach an operator, producing a new observable.
    ///
    /// The source is not subscribed and not modified.
    pub fn lift<U: 'static>(&self, operator: impl Operator<T, U> + 'static) -> Observable<U> {
        let source = self.clone();
        Observable::try_create(move |downstream: Subscriber<U>| {
            let upstream = operator.call(downstream.clone());
            trace!("lifted subscriber wired");
            downstream.add(&upstream);
            source.subscribe_with(upstream);
            Ok(Teardown::Empty)
        })
    }
}

impl<T: Clone + 'static> Observable<T> {
    /// Emit each value of `values`, then complete.
    pub fn of(values: Vec<T>) -> Self {
        Self::new(move |subscriber| {
            for value in &values {
                if subscriber.is_closed() {
                    return;
                }
                subscriber.next(value.clone());
            }
            subscriber.complete();
        })
    }

    /// Emit every item of a re-iterable collection, then complete.
    pub fn from_iterable<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + 'static,
    {
        Self::new(move |subscriber| {
            for value in iter.clone() {
                if subscriber.is_closed() {
                    return;
                }
                subscriber.next(value);
            }
            subscriber.complete();
        })
    }
}

impl<T: 'static> Observable<T> {
    /// Complete immediately without emitting.
    pub fn empty() -> Self {
        Self::new(|subscriber| subscriber.complete())
    }

    /// Never emit and never terminate.
    pub fn never() -> Self {
        Self::new(|_| {})
    }

    /// Error immediately with `err`.
    pub fn throw_error(err: StreamError) -> Self {
        Self::new(move |subscriber| subscriber.error(err.clone()))
    }
}

/// Simple value transforms. They add no protocol of their own.
impl<T: 'static> Observable<T> {
    /// Transform each value.
    pub fn map<U: 'static>(&self, f: impl Fn(T) -> U + 'static) -> Observable<U> {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Transform each value with a fallible projection; a failure errors the stream.
    pub fn try_map<U: 'static>(&self, f: impl Fn(T) -> StreamResult<U> + 'static) -> Observable<U> {
        let f = Rc::new(f);
        self.lift(move |downstream: Subscriber<U>| -> Subscriber<T> {
            let f = Rc::clone(&f);
            Subscriber::new(Forward::new(downstream, move |value: T, out: &Subscriber<U>| {
                out.next(f(value)?);
                Ok(())
            }))
        })
    }

    /// Keep only the values matching `predicate`.
    pub fn filter(&self, predicate: impl Fn(&T) -> bool + 'static) -> Observable<T> {
        let predicate = Rc::new(predicate);
        self.lift(move |downstream: Subscriber<T>| -> Subscriber<T> {
            let predicate = Rc::clone(&predicate);
            Subscriber::new(Forward::new(downstream, move |value: T, out: &Subscriber<T>| {
                if predicate(&value) {
                    out.next(value);
                }
                Ok(())
            }))
        })
    }
}

/// An observer that handles values itself and forwards terminal signals.
pub(crate) struct Forward<U, F> {
    downstream: Subscriber<U>,
    on_value: F,
}

impl<U, F> Forward<U, F> {
    pub(crate) fn new(downstream: Subscriber<U>, on_value: F) -> Self {
        Self {
            downstream,
            on_value,
        }
    }
}

impl<T, U, F> Observer<T> for Forward<U, F>
where
    U: 'static,
    F: FnMut(T, &Subscriber<U>) -> StreamResult<()>,
{
    fn next(&mut self, value: T) -> StreamResult<()> {
        (self.on_value)(value, &self.downstream)
    }

    fn error(&mut self, err: StreamError) {
        self.downstream.error(err);
    }

    fn complete(&mut self) {
        self.downstream.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    fn collect<T: Clone + 'static>(source: &Observable<T>) -> Rc<RefCell<Vec<T>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        source.subscribe_next(move |v| s.borrow_mut().push(v));
        seen
    }

    #[test]
    fn test_subscribe_is_lazy_and_repeatable() {
        let runs = Rc::new(Cell::new(0));
        let r = Rc::clone(&runs);
        let source = Observable::new(move |subscriber| {
            r.set(r.get() + 1);
            subscriber.next(r.get());
            subscriber.complete();
        });
        assert_eq!(runs.get(), 0);

        let first = collect(&source);
        let second = collect(&source);
        assert_eq!(runs.get(), 2);
        assert_eq!(*first.borrow(), vec![1]);
        assert_eq!(*second.borrow(), vec![2]);
    }

    #[test]
    fn test_producer_teardown_runs_on_unsubscribe() {
        let torn_down = Rc::new(Cell::new(false));
        let t = Rc::clone(&torn_down);
        let source: Observable<i32> = Observable::create(move |_| {
            let t = Rc::clone(&t);
            Teardown::new(move || t.set(true))
        });

        let sub = source.subscribe_next(|_| {});
        assert!(!torn_down.get());
        sub.unsubscribe().unwrap();
        assert!(torn_down.get());
    }

    #[test]
    fn test_teardown_after_sync_complete_runs_immediately() {
        let torn_down = Rc::new(Cell::new(false));
        let t = Rc::clone(&torn_down);
        let source: Observable<i32> = Observable::create(move |subscriber| {
            subscriber.complete();
            let t = Rc::clone(&t);
            Teardown::new(move || t.set(true))
        });

        let sub = source.subscribe_next(|_| {});
        assert!(sub.is_closed());
        assert!(torn_down.get());
    }

    #[test]
    fn test_producer_failure_becomes_error() {
        let source: Observable<i32> =
            Observable::try_create(|_| Err(StreamError::message("refused")));
        let err = Rc::new(RefCell::new(None));
        let e = Rc::clone(&err);
        source.subscribe(FnObserver::new().on_error(move |x| *e.borrow_mut() = Some(x)));
        assert_eq!(*err.borrow(), Some(StreamError::message("refused")));
    }

    #[test]
    fn test_identity_lift_matches_source() {
        let source = Observable::of(vec![1, 2, 3]);
        let lifted = source.lift(|downstream: Subscriber<i32>| downstream);

        assert_eq!(*collect(&source).borrow(), *collect(&lifted).borrow());
    }

    #[test]
    fn test_lift_does_not_subscribe_eagerly() {
        let runs = Rc::new(Cell::new(0));
        let r = Rc::clone(&runs);
        let source = Observable::new(move |subscriber: Subscriber<i32>| {
            r.set(r.get() + 1);
            subscriber.complete();
        });

        let chained = source.map(|v| v * 2).filter(|v| *v > 0);
        assert_eq!(runs.get(), 0);
        chained.subscribe_next(|_| {});
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_unsubscribe_reaches_source() {
        let torn_down = Rc::new(Cell::new(false));
        let t = Rc::clone(&torn_down);
        let source: Observable<i32> = Observable::create(move |_| {
            let t = Rc::clone(&t);
            Teardown::new(move || t.set(true))
        });

        let sub = source.map(|v| v + 1).map(|v| v * 2).subscribe_next(|_| {});
        sub.unsubscribe().unwrap();
        assert!(torn_down.get());
    }

    #[test]
    fn test_try_map_failure_errors_stream() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (s1, s2) = (Rc::clone(&seen), Rc::clone(&seen));
        Observable::of(vec![1, 2, 3])
            .try_map(|v| {
                if v == 2 {
                    Err(StreamError::message("two"))
                } else {
                    Ok(v * 10)
                }
            })
            .subscribe(
                FnObserver::new()
                    .on_next(move |v| s1.borrow_mut().push(Ok(v)))
                    .on_error(move |e| s2.borrow_mut().push(Err(e))),
            );

        assert_eq!(
            *seen.borrow(),
            vec![Ok(10), Err(StreamError::message("two"))]
        );
    }

    #[test]
    fn test_of_stops_after_unsubscribe_in_callback() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let holder: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let subscriber = {
            let seen = Rc::clone(&seen);
            let holder = Rc::clone(&holder);
            Subscriber::from_fn(move |v: i32| {
                seen.borrow_mut().push(v);
                if let Some(sub) = holder.borrow().as_ref() {
                    sub.unsubscribe().unwrap();
                }
            })
        };
        *holder.borrow_mut() = Some(subscriber.subscription().clone());

        Observable::of(vec![1, 2, 3]).subscribe_with(subscriber);
        assert_eq!(*seen.borrow(), vec![1]);
    }
}
