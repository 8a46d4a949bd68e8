//! Emitting the latest source value when a notifier fires.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{StreamError, StreamResult};
use crate::observable::{Forward, Observable};
use crate::subscriber::{Observer, Subscriber};

impl<T: Clone + 'static> Observable<T> {
    /// Emit the most recent source value every time `notifier` emits.
    ///
    /// Nothing is emitted before the source produces its first value; the
    /// same value may be emitted repeatedly. The result completes with the
    /// source and ignores the notifier completing. An error from either
    /// errors the result.
    pub fn sample<N: 'static>(&self, notifier: &Observable<N>) -> Observable<T> {
        let notifier = notifier.clone();
        self.lift(move |downstream: Subscriber<T>| -> Subscriber<T> {
            let latest = Rc::new(RefCell::new(None::<T>));

            let sampler = Subscriber::new(Sampler {
                downstream: downstream.clone(),
                latest: Rc::clone(&latest),
            });
            downstream.add(&sampler);
            notifier.subscribe_with(sampler);

            Subscriber::new(Forward::new(downstream, move |value: T, _: &Subscriber<T>| {
                *latest.borrow_mut() = Some(value);
                Ok(())
            }))
        })
    }
}

struct Sampler<T> {
    downstream: Subscriber<T>,
    latest: Rc<RefCell<Option<T>>>,
}

impl<T: Clone + 'static, N> Observer<N> for Sampler<T> {
    fn next(&mut self, _: N) -> StreamResult<()> {
        let latest = self.latest.borrow().clone();
        if let Some(value) = latest {
            self.downstream.next(value);
        }
        Ok(())
    }

    fn error(&mut self, err: StreamError) {
        self.downstream.error(err);
    }

    fn complete(&mut self) {}
}
