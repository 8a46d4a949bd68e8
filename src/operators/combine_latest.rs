//! Joining several sources by their most recent values.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::{StreamError, StreamResult};
use crate::observable::Observable;
use crate::subscriber::{Observer, Subscriber};

type Project<T, R> = dyn Fn(Vec<T>) -> StreamResult<R>;

impl<T: Clone + 'static> Observable<T> {
    /// Emit the latest value of every source whenever any of them emits,
    /// once each has emitted at least once.
    ///
    /// Sources are subscribed in order. The result completes when every
    /// source has completed and errors on the first error. With no sources it
    /// completes immediately.
    ///
    /// # Example
    ///
    /// ```rust
    /// use rivulet::{Observable, Subject};
    /// use std::cell::RefCell;
    /// use std::rc::Rc;
    ///
    /// let a = Subject::new();
    /// let b = Subject::new();
    /// let seen = Rc::new(RefCell::new(Vec::new()));
    /// let s = Rc::clone(&seen);
    /// Observable::combine_latest(vec![a.as_observable(), b.as_observable()])
    ///     .subscribe_next(move |v| s.borrow_mut().push(v));
    ///
    /// a.next(1);
    /// a.next(2);
    /// b.next(10);
    /// assert_eq!(*seen.borrow(), vec![vec![2, 10]]);
    /// ```
    pub fn combine_latest(sources: Vec<Observable<T>>) -> Observable<Vec<T>> {
        Self::combine_latest_with(sources, Ok)
    }

    /// Like [`combine_latest`](Self::combine_latest), passing each combination
    /// through `project`. A projection error errors the result.
    pub fn combine_latest_with<R: 'static>(
        sources: Vec<Observable<T>>,
        project: impl Fn(Vec<T>) -> StreamResult<R> + 'static,
    ) -> Observable<R> {
        let project: Rc<Project<T, R>> = Rc::new(project);
        Observable::new(move |downstream: Subscriber<R>| {
            if sources.is_empty() {
                downstream.complete();
                return;
            }

            let state = Rc::new(CombineState {
                downstream: downstream.clone(),
                values: RefCell::new(vec![None; sources.len()]),
                to_respond: Cell::new(sources.len()),
                active: Cell::new(sources.len()),
                project: Rc::clone(&project),
            });

            for (index, source) in sources.iter().enumerate() {
                if downstream.is_closed() {
                    break;
                }
                let subscriber = Subscriber::new(CombineObserver {
                    state: Rc::clone(&state),
                    index,
                });
                downstream.add(&subscriber);
                source.subscribe_with(subscriber);
            }
        })
    }

    /// Combine this source with `other` into pairs of latest values.
    pub fn combine_latest_pair(&self, other: &Observable<T>) -> Observable<(T, T)> {
        Self::combine_latest_with(vec![self.clone(), other.clone()], |mut values| {
            let second = values.pop();
            let first = values.pop();
            match (first, second) {
                (Some(first), Some(second)) => Ok((first, second)),
                _ => Err(StreamError::message("combine_latest_pair expects two values")),
            }
        })
    }
}

struct CombineState<T, R> {
    downstream: Subscriber<R>,
    values: RefCell<Vec<Option<T>>>,
    to_respond: Cell<usize>,
    active: Cell<usize>,
    project: Rc<Project<T, R>>,
}

struct CombineObserver<T, R> {
    state: Rc<CombineState<T, R>>,
    index: usize,
}

impl<T: Clone + 'static, R: 'static> Observer<T> for CombineObserver<T, R> {
    fn next(&mut self, value: T) -> StreamResult<()> {
        let state = &self.state;
        let snapshot = {
            let mut values = state.values.borrow_mut();
            if values[self.index].is_none() {
                state.to_respond.set(state.to_respond.get() - 1);
            }
            values[self.index] = Some(value);
            if state.to_respond.get() > 0 {
                None
            } else {
                Some(values.iter().flatten().cloned().collect::<Vec<T>>())
            }
        };

        if let Some(values) = snapshot {
            let combined = (state.project)(values)?;
            state.downstream.next(combined);
        }
        Ok(())
    }

    fn error(&mut self, err: StreamError) {
        self.state.downstream.error(err);
    }

    fn complete(&mut self) {
        let remaining = self.state.active.get() - 1;
        self.state.active.set(remaining);
        if remaining == 0 {
            self.state.downstream.complete();
        }
    }
}
