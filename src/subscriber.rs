//! Observers and the subscribers that drive them.
//!
//! A [`Subscriber`] is a [`Subscription`] composed with an [`Observer`]. It
//! owns the terminal-state rules so observers never have to: `next` after
//! `error`/`complete` is dropped, each terminal signal is delivered at most
//! once, reaching a terminal state releases the subscription, and an explicit
//! unsubscribe stops all further delivery.
//!
//! # Re-entrancy
//!
//! Notifications that arrive while one of this subscriber's own hooks is
//! running (for example an observer whose `next` causes its own source to emit
//! again) are queued and delivered, in order, as soon as the running hook
//! returns.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::error::{StreamError, StreamResult, UnsubscriptionError};
use crate::notification::Notification;
use crate::subscription::{report, Subscription, Teardown};

/// The three-channel consumer contract.
///
/// A `next` hook that returns `Err` does not unwind anywhere: the subscriber
/// running it turns the error into its own `error` notification.
pub trait Observer<T> {
    /// Receive a value.
    fn next(&mut self, value: T) -> StreamResult<()>;

    /// Receive the terminal error.
    fn error(&mut self, err: StreamError);

    /// Receive the terminal completion.
    fn complete(&mut self);
}

type NextFn<T> = Box<dyn FnMut(T) -> StreamResult<()>>;

/// An observer assembled from up to three closures.
///
/// Missing handlers are no-ops.
///
/// # Example
///
/// ```rust
/// use rivulet::{FnObserver, Observable};
///
/// let sub = Observable::of(vec![1, 2, 3]).subscribe(
///     FnObserver::new()
///         .on_next(|v: i32| println!("value {v}"))
///         .on_complete(|| println!("done")),
/// );
/// assert!(sub.is_closed());
/// ```
pub struct FnObserver<T> {
    next: Option<NextFn<T>>,
    error: Option<Box<dyn FnMut(StreamError)>>,
    complete: Option<Box<dyn FnMut()>>,
}

impl<T> FnObserver<T> {
    /// Create an observer with no handlers.
    pub fn new() -> Self {
        Self {
            next: None,
            error: None,
            complete: None,
        }
    }

    /// Set the value handler.
    pub fn on_next(mut self, mut f: impl FnMut(T) + 'static) -> Self {
        self.next = Some(Box::new(move |value| {
            f(value);
            Ok(())
        }));
        self
    }

    /// Set a value handler that may fail; a failure becomes the stream's error.
    pub fn try_on_next(mut self, f: impl FnMut(T) -> StreamResult<()> + 'static) -> Self {
        self.next = Some(Box::new(f));
        self
    }

    /// Set the error handler.
    pub fn on_error(mut self, f: impl FnMut(StreamError) + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    /// Set the completion handler.
    pub fn on_complete(mut self, f: impl FnMut() + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }
}

impl<T> Default for FnObserver<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Observer<T> for FnObserver<T> {
    fn next(&mut self, value: T) -> StreamResult<()> {
        match self.next.as_mut() {
            Some(f) => f(value),
            None => Ok(()),
        }
    }

    fn error(&mut self, err: StreamError) {
        match self.error.as_mut() {
            Some(f) => f(err),
            None => debug!(error = %err, "stream error reached an observer without an error handler"),
        }
    }

    fn complete(&mut self) {
        if let Some(f) = self.complete.as_mut() {
            f();
        }
    }
}

struct Inner<T> {
    subscription: Subscription,
    stopped: Cell<bool>,
    observer: RefCell<Option<Box<dyn Observer<T>>>>,
    queue: RefCell<VecDeque<Notification<T>>>,
}

/// Drives one observer for the lifetime of one subscription.
///
/// Cloning yields another handle to the same subscriber.
pub struct Subscriber<T> {
    inner: Rc<Inner<T>>,
}

impl<T: 'static> Subscriber<T> {
    /// Wrap an observer.
    pub fn new(observer: impl Observer<T> + 'static) -> Self {
        let inner = Rc::new(Inner {
            subscription: Subscription::new(),
            stopped: Cell::new(false),
            observer: RefCell::new(Some(Box::new(observer) as Box<dyn Observer<T>>)),
            queue: RefCell::new(VecDeque::new()),
        });

        // Release the observer (and everything it captured) on unsubscribe.
        // While one of its hooks is running the dispatch loop does it instead.
        let weak = Rc::downgrade(&inner);
        inner.subscription.add(Teardown::new(move || {
            if let Some(inner) = weak.upgrade() {
                let observer = inner
                    .observer
                    .try_borrow_mut()
                    .ok()
                    .and_then(|mut slot| slot.take());
                inner.queue.borrow_mut().clear();
                drop(observer);
            }
        }));

        Self { inner }
    }

    /// Create a subscriber from a value handler only.
    pub fn from_fn(f: impl FnMut(T) + 'static) -> Self {
        Self::new(FnObserver::new().on_next(f))
    }

    /// Deliver a value unless the subscriber is stopped or closed.
    pub fn next(&self, value: T) {
        if self.is_stopped() {
            return;
        }
        self.dispatch(Notification::Next(value));
    }

    /// Deliver the terminal error, then release the subscription.
    pub fn error(&self, err: StreamError) {
        if self.is_stopped() {
            return;
        }
        self.inner.stopped.set(true);
        self.dispatch(Notification::Error(err));
    }

    /// Deliver the terminal completion, then release the subscription.
    pub fn complete(&self) {
        if self.is_stopped() {
            return;
        }
        self.inner.stopped.set(true);
        self.dispatch(Notification::Complete);
    }

    fn dispatch(&self, notification: Notification<T>) {
        self.inner.queue.borrow_mut().push_back(notification);

        let Ok(mut slot) = self.inner.observer.try_borrow_mut() else {
            // One of our hooks is on the stack; it drains the queue on return.
            return;
        };

        let mut terminal = false;
        while !terminal && !self.inner.subscription.is_closed() {
            let pending = self.inner.queue.borrow_mut().pop_front();
            let Some(notification) = pending else {
                break;
            };
            let Some(observer) = slot.as_mut() else {
                break;
            };
            match notification {
                Notification::Next(value) => {
                    if let Err(err) = observer.next(value) {
                        self.error(err);
                    }
                }
                Notification::Error(err) => {
                    observer.error(err);
                    terminal = true;
                }
                Notification::Complete => {
                    observer.complete();
                    terminal = true;
                }
            }
        }

        let finished = terminal || self.inner.subscription.is_closed();
        let observer = if finished { slot.take() } else { None };
        drop(slot);
        if finished {
            self.inner.queue.borrow_mut().clear();
        }
        drop(observer);

        if terminal {
            report(self.inner.subscription.unsubscribe());
        }
    }
}

impl<T> Subscriber<T> {
    /// Whether a terminal notification was accepted or the subscription is closed.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.get() || self.inner.subscription.is_closed()
    }

    /// Whether the underlying subscription has been released.
    pub fn is_closed(&self) -> bool {
        self.inner.subscription.is_closed()
    }

    /// The subscription owned by this subscriber.
    pub fn subscription(&self) -> &Subscription {
        &self.inner.subscription
    }

    /// Attach a resource released together with this subscriber.
    pub fn add(&self, teardown: impl Into<Teardown>) {
        self.inner.subscription.add(teardown);
    }

    /// Detach a child subscription without releasing it.
    pub fn remove(&self, child: &Subscription) {
        self.inner.subscription.remove(child);
    }

    /// Stop delivery and release every resource held by this subscriber.
    pub fn unsubscribe(&self) -> Result<(), UnsubscriptionError> {
        self.inner.subscription.unsubscribe()
    }
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Subscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("stopped", &self.inner.stopped.get())
            .field("subscription", &self.inner.subscription)
            .finish()
    }
}

impl<T> From<&Subscriber<T>> for Teardown {
    fn from(subscriber: &Subscriber<T>) -> Self {
        Teardown::Subscription(subscriber.inner.subscription.clone())
    }
}

/// Forwarding: a subscriber can observe another stream on behalf of its own.
impl<T: 'static> Observer<T> for Subscriber<T> {
    fn next(&mut self, value: T) -> StreamResult<()> {
        Subscriber::next(self, value);
        Ok(())
    }

    fn error(&mut self, err: StreamError) {
        Subscriber::error(self, err);
    }

    fn complete(&mut self) {
        Subscriber::complete(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> (Rc<RefCell<Vec<Notification<i32>>>>, Subscriber<i32>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (l1, l2, l3) = (Rc::clone(&log), Rc::clone(&log), Rc::clone(&log));
        let subscriber = Subscriber::new(
            FnObserver::new()
                .on_next(move |v| l1.borrow_mut().push(Notification::Next(v)))
                .on_error(move |e| l2.borrow_mut().push(Notification::Error(e)))
                .on_complete(move || l3.borrow_mut().push(Notification::Complete)),
        );
        (log, subscriber)
    }

    #[test]
    fn test_no_next_after_complete() {
        let (log, subscriber) = recording();
        subscriber.next(1);
        subscriber.complete();
        subscriber.next(2);
        subscriber.complete();
        subscriber.error(StreamError::message("late"));

        assert_eq!(
            *log.borrow(),
            vec![Notification::Next(1), Notification::Complete]
        );
        assert!(subscriber.is_closed());
    }

    #[test]
    fn test_no_next_after_error() {
        let (log, subscriber) = recording();
        subscriber.error(StreamError::message("boom"));
        subscriber.next(1);

        assert_eq!(
            *log.borrow(),
            vec![Notification::Error(StreamError::message("boom"))]
        );
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let (log, subscriber) = recording();
        subscriber.next(1);
        subscriber.unsubscribe().unwrap();
        subscriber.next(2);
        subscriber.complete();

        assert_eq!(*log.borrow(), vec![Notification::Next(1)]);
    }

    #[test]
    fn test_failing_hook_becomes_error() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let subscriber = Subscriber::new(
            FnObserver::new()
                .try_on_next(|v: i32| {
                    if v > 1 {
                        Err(StreamError::message("too big"))
                    } else {
                        Ok(())
                    }
                })
                .on_error(move |e| l.borrow_mut().push(e)),
        );

        subscriber.next(1);
        subscriber.next(2);
        subscriber.next(3);

        assert_eq!(*log.borrow(), vec![StreamError::message("too big")]);
        assert!(subscriber.is_closed());
    }

    #[test]
    fn test_terminal_releases_resources() {
        let released = Rc::new(Cell::new(false));
        let r = Rc::clone(&released);
        let (_, subscriber) = recording();
        subscriber.add(Teardown::new(move || r.set(true)));

        subscriber.complete();
        assert!(released.get());
    }

    #[test]
    fn test_reentrant_notifications_are_queued_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let slot: Rc<RefCell<Option<Subscriber<i32>>>> = Rc::new(RefCell::new(None));

        let l = Rc::clone(&log);
        let s = Rc::clone(&slot);
        let subscriber = Subscriber::from_fn(move |v: i32| {
            l.borrow_mut().push(v);
            if v == 1 {
                let me = s.borrow().clone();
                if let Some(me) = me {
                    me.next(2);
                    me.complete();
                    me.next(3);
                }
            }
        });
        *slot.borrow_mut() = Some(subscriber.clone());

        subscriber.next(1);
        assert_eq!(*log.borrow(), vec![1, 2]);
        assert!(subscriber.is_closed());
        slot.borrow_mut().take();
    }
}
