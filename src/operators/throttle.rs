//! Rate limiting: at most one value per throttle window.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::error::{StreamError, StreamResult};
use crate::observable::Observable;
use crate::scheduler::{Action, Scheduler};
use crate::subscriber::{Observer, Subscriber};
use crate::subscription::report;

impl<T: 'static> Observable<T> {
    /// Let one value through per `delay`.
    ///
    /// The first value of a window is held and emitted when the window ends;
    /// values arriving while it is held are dropped. Completion or an error
    /// ends the stream at once, discarding a held value.
    pub fn throttle(&self, delay: Duration, scheduler: &Scheduler) -> Observable<T> {
        let scheduler = scheduler.clone();
        self.lift(move |downstream: Subscriber<T>| -> Subscriber<T> {
            Subscriber::new(ThrottleObserver {
                state: Rc::new(ThrottleState {
                    downstream,
                    delay,
                    scheduler: scheduler.clone(),
                    throttled: RefCell::new(None),
                }),
            })
        })
    }
}

struct ThrottleState<T> {
    downstream: Subscriber<T>,
    delay: Duration,
    scheduler: Scheduler,
    throttled: RefCell<Option<Action<Option<T>>>>,
}

impl<T: 'static> ThrottleState<T> {
    fn throttle(self: &Rc<Self>, value: T) {
        if self.throttled.borrow().is_some() {
            return;
        }
        let state = Rc::clone(self);
        let action = self
            .scheduler
            .schedule(self.delay, Some(value), move |_, value| {
                state.clear_throttle();
                if let Some(value) = value.take() {
                    state.downstream.next(value);
                }
            });
        if action.is_closed() {
            // Already ran on an immediate scheduler.
            return;
        }
        self.downstream.add(&action);
        *self.throttled.borrow_mut() = Some(action);
    }

    fn clear_throttle(&self) {
        let throttled = self.throttled.borrow_mut().take();
        if let Some(action) = throttled {
            report(action.unsubscribe());
            self.downstream.remove(action.subscription());
        }
    }
}

struct ThrottleObserver<T> {
    state: Rc<ThrottleState<T>>,
}

impl<T: 'static> Observer<T> for ThrottleObserver<T> {
    fn next(&mut self, value: T) -> StreamResult<()> {
        self.state.throttle(value);
        Ok(())
    }

    fn error(&mut self, err: StreamError) {
        self.state.downstream.error(err);
    }

    fn complete(&mut self) {
        self.state.downstream.complete();
    }
}
