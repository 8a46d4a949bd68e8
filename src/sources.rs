//! Sources driven by a scheduler clock.

use std::time::Duration;

use tracing::warn;

use crate::error::ConfigError;
use crate::observable::Observable;
use crate::scheduler::Scheduler;
use crate::subscriber::Subscriber;
use crate::subscription::Teardown;

impl Observable<u64> {
    /// Emit `0, 1, 2, ...`, one value every `period`, never completing.
    ///
    /// A zero period errors the result when it is subscribed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use rivulet::{Observable, VirtualTimeScheduler};
    /// use std::cell::RefCell;
    /// use std::rc::Rc;
    /// use std::time::Duration;
    ///
    /// let vts = VirtualTimeScheduler::new();
    /// let ticks = Rc::new(RefCell::new(Vec::new()));
    /// let t = Rc::clone(&ticks);
    /// let subscription = Observable::interval(Duration::from_secs(1), &vts.scheduler())
    ///     .subscribe_next(move |n| t.borrow_mut().push(n));
    ///
    /// vts.advance_by(Duration::from_secs(3));
    /// subscription.unsubscribe().unwrap();
    /// vts.advance_by(Duration::from_secs(3));
    /// assert_eq!(*ticks.borrow(), vec![0, 1, 2]);
    /// ```
    pub fn interval(period: Duration, scheduler: &Scheduler) -> Observable<u64> {
        if period.is_zero() {
            let err = ConfigError::invalid("period", "must be greater than zero");
            warn!(%err, "rejected interval");
            return Observable::throw_error(err.into());
        }
        let scheduler = scheduler.clone();
        Observable::create(move |subscriber: Subscriber<u64>| {
            let action = scheduler.schedule_periodic(period, period, 0u64, move |_, index| {
                subscriber.next(*index);
                *index += 1;
            });
            Teardown::from(&action)
        })
    }

    /// Emit `0` once after `delay`, then complete.
    pub fn timer(delay: Duration, scheduler: &Scheduler) -> Observable<u64> {
        let scheduler = scheduler.clone();
        Observable::create(move |subscriber: Subscriber<u64>| {
            let action = scheduler.schedule(delay, subscriber, |_, subscriber| {
                subscriber.next(0);
                subscriber.complete();
            });
            Teardown::from(&action)
        })
    }
}
