//! Reified stream events.

use crate::error::{StreamError, StreamResult};
use crate::subscriber::{Observer, Subscriber};

/// One event of a stream, as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification<T> {
    Next(T),
    Error(StreamError),
    Complete,
}

impl<T> Notification<T> {
    /// Whether this notification ends the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Notification::Next(_))
    }

    /// Map the carried value, keeping terminal notifications as they are.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Notification<U> {
        match self {
            Notification::Next(value) => Notification::Next(f(value)),
            Notification::Error(err) => Notification::Error(err),
            Notification::Complete => Notification::Complete,
        }
    }

    /// Hand this notification to a bare observer, returning what its `next` returned.
    pub fn accept(self, observer: &mut dyn Observer<T>) -> StreamResult<()> {
        match self {
            Notification::Next(value) => observer.next(value),
            Notification::Error(err) => {
                observer.error(err);
                Ok(())
            }
            Notification::Complete => {
                observer.complete();
                Ok(())
            }
        }
    }
}

impl<T: 'static> Notification<T> {
    /// Replay this notification into a subscriber.
    pub fn deliver(self, subscriber: &Subscriber<T>) {
        match self {
            Notification::Next(value) => subscriber.next(value),
            Notification::Error(err) => subscriber.error(err),
            Notification::Complete => subscriber.complete(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::FnObserver;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_accept_returns_next_result_and_forwards_terminals() {
        let completed = Rc::new(Cell::new(false));
        let c = Rc::clone(&completed);
        let mut observer = FnObserver::new()
            .try_on_next(|v: i32| {
                if v > 1 {
                    Err(StreamError::message("too big"))
                } else {
                    Ok(())
                }
            })
            .on_complete(move || c.set(true));

        assert!(Notification::Next(1).accept(&mut observer).is_ok());
        assert_eq!(
            Notification::Next(2).accept(&mut observer),
            Err(StreamError::message("too big"))
        );
        assert!(Notification::Complete.accept(&mut observer).is_ok());
        assert!(completed.get());
    }
}
