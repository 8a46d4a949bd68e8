//! Bridging observables into async streams.
//!
//! An observable pushes; a [`Stream`] is pulled. The bridge subscribes to the
//! observable and forwards every notification into a tokio mpsc channel whose
//! receiver is exposed as an [`EventStream`]. Values arrive as `Ok`, an error
//! arrives as one final `Err`, and completion ends the stream.

use std::marker::PhantomData;
use std::pin::Pin;

use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};
use tracing::debug;

use crate::error::{StreamError, StreamResult};
use crate::observable::Observable;
use crate::subscriber::Observer;
use crate::subscription::Subscription;

/// Type alias for a boxed async stream of events.
pub type EventStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Builder for bridging an observable into an [`EventStream`].
///
/// # Example
///
/// ```rust
/// use futures::StreamExt;
/// use rivulet::{Observable, StreamBuilder};
///
/// # async fn example() {
/// let (_subscription, stream) = StreamBuilder::<u32>::new()
///     .buffer_size(16)
///     .build(&Observable::of(vec![1, 2, 3]));
///
/// let values: Vec<u32> = stream.map(|item| item.unwrap()).collect().await;
/// assert_eq!(values, vec![1, 2, 3]);
/// # }
/// ```
pub struct StreamBuilder<T> {
    buffer_size: Option<usize>,
    _marker: PhantomData<T>,
}

impl<T: Send + 'static> StreamBuilder<T> {
    /// Create a new stream builder with default settings.
    pub fn new() -> Self {
        Self {
            buffer_size: Some(100),
            _marker: PhantomData,
        }
    }

    /// Set the buffer size for the underlying channel.
    ///
    /// Default is 100. A value arriving while the buffer is full errors the
    /// subscription with [`StreamError::Overflow`].
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size.max(1));
        self
    }

    /// Buffer without limit.
    pub fn unbounded(mut self) -> Self {
        self.buffer_size = None;
        self
    }

    /// Subscribe to `source` and return the subscription with the stream.
    ///
    /// Dropping the stream is noticed at the next value, which then tears
    /// the subscription down with [`StreamError::Disconnected`].
    pub fn build(self, source: &Observable<T>) -> (Subscription, EventStream<StreamResult<T>>) {
        match self.buffer_size {
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity);
                let subscription = source.subscribe(ChannelObserver {
                    sink: Sink::Bounded { tx, capacity },
                });
                let stream: EventStream<StreamResult<T>> = Box::pin(ReceiverStream::new(rx));
                (subscription, stream)
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                let subscription = source.subscribe(ChannelObserver {
                    sink: Sink::Unbounded(tx),
                });
                let stream: EventStream<StreamResult<T>> =
                    Box::pin(UnboundedReceiverStream::new(rx));
                (subscription, stream)
            }
        }
    }
}

impl<T: Send + 'static> Default for StreamBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Bridge `source` into a stream with the default buffer size.
pub fn into_stream<T: Send + 'static>(
    source: &Observable<T>,
) -> (Subscription, EventStream<StreamResult<T>>) {
    StreamBuilder::<T>::new().build(source)
}

enum Sink<T> {
    Bounded {
        tx: mpsc::Sender<StreamResult<T>>,
        capacity: usize,
    },
    Unbounded(mpsc::UnboundedSender<StreamResult<T>>),
}

struct ChannelObserver<T> {
    sink: Sink<T>,
}

impl<T> ChannelObserver<T> {
    fn send(&self, item: StreamResult<T>) -> StreamResult<()> {
        match &self.sink {
            Sink::Bounded { tx, capacity } => tx.try_send(item).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => StreamError::Overflow {
                    capacity: *capacity,
                },
                mpsc::error::TrySendError::Closed(_) => StreamError::Disconnected,
            }),
            Sink::Unbounded(tx) => tx.send(item).map_err(|_| StreamError::Disconnected),
        }
    }
}

impl<T> Observer<T> for ChannelObserver<T> {
    fn next(&mut self, value: T) -> StreamResult<()> {
        self.send(Ok(value))
    }

    fn error(&mut self, err: StreamError) {
        if let Err(undelivered) = self.send(Err(err)) {
            debug!(%undelivered, "stream error not delivered");
        }
    }

    fn complete(&mut self) {}
}

/// Extension trait for working with event streams.
pub trait EventStreamExt<T> {
    /// Convert into a boxed stream.
    fn boxed(self) -> EventStream<T>;
}

impl<S, T> EventStreamExt<T> for S
where
    S: Stream<Item = T> + Send + 'static,
{
    fn boxed(self) -> EventStream<T> {
        Box::pin(self)
    }
}
