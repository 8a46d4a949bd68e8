//! Multicast source that is also an observer.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{StreamError, StreamResult};
use crate::notification::Notification;
use crate::observable::Observable;
use crate::subscriber::{Observer, Subscriber};
use crate::subscription::Teardown;

struct Inner<T> {
    observers: RefCell<Vec<(u64, Subscriber<T>)>>,
    next_id: Cell<u64>,
    terminal: RefCell<Option<Notification<T>>>,
}

/// Broadcasts every notification it receives to its current subscribers.
///
/// Delivery iterates over a snapshot of the subscribers taken when the
/// notification arrives, so subscribing or unsubscribing from inside a
/// callback affects only later notifications. Once terminated, the subject
/// replays its terminal notification to anyone who subscribes afterwards.
///
/// # Example
///
/// ```rust
/// use rivulet::Subject;
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let subject = Subject::new();
/// let seen = Rc::new(RefCell::new(Vec::new()));
///
/// let s = Rc::clone(&seen);
/// subject.as_observable().subscribe_next(move |v| s.borrow_mut().push(v));
///
/// subject.next(1);
/// subject.next(2);
/// subject.complete();
/// subject.next(3);
///
/// assert_eq!(*seen.borrow(), vec![1, 2]);
/// ```
pub struct Subject<T> {
    inner: Rc<Inner<T>>,
}

impl<T: Clone + 'static> Subject<T> {
    /// A subject with no subscribers that has not terminated.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                observers: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
                terminal: RefCell::new(None),
            }),
        }
    }

    /// Push a value to every current subscriber.
    pub fn next(&self, value: T) {
        if self.is_stopped() {
            return;
        }
        for subscriber in self.snapshot() {
            subscriber.next(value.clone());
        }
    }

    /// Terminate every current and future subscriber with `err`.
    pub fn error(&self, err: StreamError) {
        self.terminate(Notification::Error(err));
    }

    /// Complete every current and future subscriber.
    pub fn complete(&self) {
        self.terminate(Notification::Complete);
    }

    /// Whether `error` or `complete` has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.terminal.borrow().is_some()
    }

    /// Number of subscribers currently attached.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.borrow().len()
    }

    /// The subscribe side of this subject.
    pub fn as_observable(&self) -> Observable<T> {
        let inner = Rc::clone(&self.inner);
        Observable::create(move |subscriber: Subscriber<T>| {
            let terminal = inner.terminal.borrow().clone();
            if let Some(terminal) = terminal {
                terminal.deliver(&subscriber);
                return Teardown::Empty;
            }

            let id = inner.next_id.get();
            inner.next_id.set(id + 1);
            inner.observers.borrow_mut().push((id, subscriber));

            let weak: Weak<Inner<T>> = Rc::downgrade(&inner);
            Teardown::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.observers.borrow_mut().retain(|(other, _)| *other != id);
                }
            })
        })
    }

    fn snapshot(&self) -> Vec<Subscriber<T>> {
        self.inner
            .observers
            .borrow()
            .iter()
            .map(|(_, subscriber)| subscriber.clone())
            .collect()
    }

    fn terminate(&self, notification: Notification<T>) {
        if self.is_stopped() {
            return;
        }
        *self.inner.terminal.borrow_mut() = Some(notification.clone());
        let observers = std::mem::take(&mut *self.inner.observers.borrow_mut());
        for (_, subscriber) in observers {
            notification.clone().deliver(&subscriber);
        }
    }
}

impl<T: Clone + 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("observers", &self.inner.observers.borrow().len())
            .field("stopped", &self.inner.terminal.borrow().is_some())
            .finish()
    }
}

impl<T: Clone + 'static> Observer<T> for Subject<T> {
    fn next(&mut self, value: T) -> StreamResult<()> {
        Subject::next(self, value);
        Ok(())
    }

    fn error(&mut self, err: StreamError) {
        Subject::error(self, err);
    }

    fn complete(&mut self) {
        Subject::complete(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::FnObserver;

    fn recording(subject: &Subject<i32>) -> Rc<RefCell<Vec<Notification<i32>>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (l1, l2, l3) = (Rc::clone(&log), Rc::clone(&log), Rc::clone(&log));
        subject.as_observable().subscribe(
            FnObserver::new()
                .on_next(move |v| l1.borrow_mut().push(Notification::Next(v)))
                .on_error(move |e| l2.borrow_mut().push(Notification::Error(e)))
                .on_complete(move || l3.borrow_mut().push(Notification::Complete)),
        );
        log
    }

    #[test]
    fn test_multicasts_to_every_subscriber() {
        let subject = Subject::new();
        let a = recording(&subject);
        subject.next(1);
        let b = recording(&subject);
        subject.next(2);

        assert_eq!(*a.borrow(), vec![Notification::Next(1), Notification::Next(2)]);
        assert_eq!(*b.borrow(), vec![Notification::Next(2)]);
        assert_eq!(subject.observer_count(), 2);
    }

    #[test]
    fn test_terminal_is_replayed_to_late_subscribers() {
        let subject = Subject::<i32>::new();
        subject.error(StreamError::message("gone"));
        subject.complete();

        let late = recording(&subject);
        assert_eq!(
            *late.borrow(),
            vec![Notification::Error(StreamError::message("gone"))]
        );
        assert_eq!(subject.observer_count(), 0);
    }

    #[test]
    fn test_unsubscribe_detaches_observer() {
        let subject = Subject::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let subscription = subject
            .as_observable()
            .subscribe_next(move |v| s.borrow_mut().push(v));

        subject.next(1);
        subscription.unsubscribe().unwrap();
        subject.next(2);

        assert_eq!(*seen.borrow(), vec![1]);
        assert_eq!(subject.observer_count(), 0);
    }

    #[test]
    fn test_subscribing_during_delivery_waits_for_next_value() {
        let subject = Subject::new();
        let late = Rc::new(RefCell::new(Vec::new()));
        let (subject2, late2) = (subject.clone(), Rc::clone(&late));
        subject.as_observable().subscribe_next(move |v: i32| {
            if v == 1 {
                let late = Rc::clone(&late2);
                subject2
                    .as_observable()
                    .subscribe_next(move |v| late.borrow_mut().push(v));
            }
        });

        subject.next(1);
        subject.next(2);
        assert_eq!(*late.borrow(), vec![2]);
    }
}
