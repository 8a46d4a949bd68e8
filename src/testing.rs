//! Marble-diagram testing on virtual time.
//!
//! A marble diagram is a string in which every character is one frame of
//! virtual time (10ms by default):
//!
//! | Marble        | Meaning                                               |
//! |---------------|-------------------------------------------------------|
//! | `-` or space  | a frame passes                                        |
//! | any letter    | a value, mapped by the caller's `Fn(char) -> T`      |
//! | `\|`          | completion                                            |
//! | `#`           | error                                                 |
//! | `^`           | subscription point (hot sources; time zero)           |
//! | `!`           | unsubscription point (subscription diagrams)          |
//! | `( )`         | everything inside happens at the group's first frame  |
//!
//! # Example
//!
//! ```rust
//! use rivulet::testing::TestScheduler;
//!
//! let ts = TestScheduler::new();
//! let source = ts.hot("--a--^--b--c--|", |c| c);
//! let recorder = ts.record(&source.observable().map(|c| c.to_ascii_uppercase()));
//! ts.flush();
//!
//! assert_eq!(recorder.records(), ts.parse_marbles("---B--C--|", |c| c));
//! assert_eq!(source.subscriptions(), vec![ts.parse_subscription("^        !").unwrap()]);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::debug;

use crate::config::{Config, MarbleConfig};
use crate::error::{ConfigResult, StreamError, StreamResult};
use crate::notification::Notification;
use crate::observable::Observable;
use crate::scheduler::Scheduler;
use crate::subject::Subject;
use crate::subscriber::{Observer, Subscriber};
use crate::subscription::{report, Teardown};
use crate::virtual_time::VirtualTimeScheduler;

/// A notification stamped with the virtual time it happened at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded<T> {
    pub time: Duration,
    pub notification: Notification<T>,
}

/// When a test source was subscribed and unsubscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionLog {
    pub subscribed: Duration,
    /// `None` while still subscribed.
    pub unsubscribed: Option<Duration>,
}

/// Collects the notifications of one subscription, with their times.
pub struct Recorder<T> {
    scheduler: Scheduler,
    records: Rc<RefCell<Vec<Recorded<T>>>>,
}

impl<T: Clone + 'static> Recorder<T> {
    fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            records: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn observer(&self) -> RecordingObserver<T> {
        RecordingObserver {
            recorder: self.clone(),
        }
    }

    fn push(&self, notification: Notification<T>) {
        let time = self.scheduler.now();
        self.records.borrow_mut().push(Recorded { time, notification });
    }

    /// Everything recorded so far, in order.
    pub fn records(&self) -> Vec<Recorded<T>> {
        self.records.borrow().clone()
    }

    /// Only the values recorded so far.
    pub fn values(&self) -> Vec<T> {
        self.records
            .borrow()
            .iter()
            .filter_map(|record| match &record.notification {
                Notification::Next(value) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
            records: Rc::clone(&self.records),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Recorder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.records.borrow().iter()).finish()
    }
}

struct RecordingObserver<T> {
    recorder: Recorder<T>,
}

impl<T: Clone + 'static> Observer<T> for RecordingObserver<T> {
    fn next(&mut self, value: T) -> StreamResult<()> {
        self.recorder.push(Notification::Next(value));
        Ok(())
    }

    fn error(&mut self, err: StreamError) {
        self.recorder.push(Notification::Error(err));
    }

    fn complete(&mut self) {
        self.recorder.push(Notification::Complete);
    }
}

type SubscriptionLogs = Rc<RefCell<Vec<SubscriptionLog>>>;

/// Wrap `subscribe` so that every subscription is logged with its lifetime.
fn logged<T: 'static>(
    scheduler: Scheduler,
    logs: SubscriptionLogs,
    subscribe: impl Fn(&Subscriber<T>) + 'static,
) -> Observable<T> {
    Observable::create(move |subscriber: Subscriber<T>| {
        let index = {
            let mut logs = logs.borrow_mut();
            logs.push(SubscriptionLog {
                subscribed: scheduler.now(),
                unsubscribed: None,
            });
            logs.len() - 1
        };
        subscribe(&subscriber);

        let logs = Rc::clone(&logs);
        let scheduler = scheduler.clone();
        Teardown::new(move || {
            if let Some(log) = logs.borrow_mut().get_mut(index) {
                log.unsubscribed = Some(scheduler.now());
            }
        })
    })
}

/// A source that replays its diagram, relative to subscription time, for
/// every subscriber.
pub struct ColdObservable<T> {
    observable: Observable<T>,
    logs: SubscriptionLogs,
}

/// A source that plays its diagram once on the scheduler's own timeline,
/// shared by every subscriber.
pub struct HotObservable<T> {
    observable: Observable<T>,
    logs: SubscriptionLogs,
}

macro_rules! test_source {
    ($name:ident) => {
        impl<T> $name<T> {
            /// The observable to hand to the code under test.
            pub fn observable(&self) -> Observable<T> {
                self.observable.clone()
            }

            /// Every subscription made so far.
            pub fn subscriptions(&self) -> Vec<SubscriptionLog> {
                self.logs.borrow().clone()
            }
        }

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("subscriptions", &self.logs.borrow())
                    .finish()
            }
        }
    };
}

test_source!(ColdObservable);
test_source!(HotObservable);

/// Virtual-time scheduler that speaks marble diagrams.
#[derive(Debug, Clone)]
pub struct TestScheduler {
    vts: VirtualTimeScheduler,
    config: MarbleConfig,
}

impl TestScheduler {
    /// 10ms frames, flushing at most 750 frames.
    pub fn new() -> Self {
        let config = MarbleConfig::default();
        Self {
            vts: VirtualTimeScheduler::bounded(config.max_time()),
            config,
        }
    }

    /// Create a test scheduler with explicit settings.
    pub fn with_config(config: MarbleConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            vts: VirtualTimeScheduler::bounded(config.max_time()),
            config,
        })
    }

    /// The scheduler handle to pass to operators under test.
    pub fn scheduler(&self) -> Scheduler {
        self.vts.scheduler()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.vts.now()
    }

    /// Run everything scheduled, up to the frame budget.
    pub fn flush(&self) {
        self.vts.flush();
        debug!(now = ?self.now(), frames = self.config.max_frames, "marble test flushed");
    }

    /// The time at which `|` appears in `marbles`.
    pub fn time(&self, marbles: &str) -> Duration {
        let frames = marbles
            .chars()
            .position(|c| c == '|')
            .unwrap_or_else(|| marbles.chars().count());
        self.frames(frames as i64).unwrap_or_default()
    }

    /// Parse a diagram into the notifications it describes. `#` errors with
    /// the default test error.
    ///
    /// Times are relative to `^` when present. Anything before `^` is dropped.
    pub fn parse_marbles<T>(&self, marbles: &str, value: impl Fn(char) -> T) -> Vec<Recorded<T>> {
        self.parse_marbles_with_error(marbles, value, &default_error())
    }

    /// Like [`parse_marbles`](Self::parse_marbles) with an explicit error for `#`.
    pub fn parse_marbles_with_error<T>(
        &self,
        marbles: &str,
        value: impl Fn(char) -> T,
        error: &StreamError,
    ) -> Vec<Recorded<T>> {
        let origin = marbles.chars().position(|c| c == '^').unwrap_or(0) as i64;
        let mut group: Option<i64> = None;
        let mut records = Vec::new();

        for (index, c) in marbles.chars().enumerate() {
            let frame = index as i64 - origin;
            let notification = match c {
                '-' | ' ' | '^' | '!' => None,
                '(' => {
                    group = Some(frame);
                    None
                }
                ')' => {
                    group = None;
                    None
                }
                '|' => Some(Notification::Complete),
                '#' => Some(Notification::Error(error.clone())),
                other => Some(Notification::Next(value(other))),
            };
            if let Some(notification) = notification {
                if let Some(time) = self.frames(group.unwrap_or(frame)) {
                    records.push(Recorded { time, notification });
                }
            }
        }
        records
    }

    /// Parse a subscription diagram such as `"^---!"` or `"(^!)"`.
    ///
    /// Returns `None` when there is no `^`.
    pub fn parse_subscription(&self, marbles: &str) -> Option<SubscriptionLog> {
        Some(SubscriptionLog {
            subscribed: self.marker(marbles, '^')?,
            unsubscribed: self.marker(marbles, '!'),
        })
    }

    /// Time of the first `marker` in `marbles`, honouring groups.
    fn marker(&self, marbles: &str, marker: char) -> Option<Duration> {
        let mut group: Option<i64> = None;
        for (index, c) in marbles.chars().enumerate() {
            let frame = index as i64;
            match c {
                '(' => group = Some(frame),
                ')' => group = None,
                c if c == marker => return self.frames(group.unwrap_or(frame)),
                _ => {}
            }
        }
        None
    }

    /// A cold source erroring with the default test error on `#`.
    pub fn cold<T: Clone + 'static>(&self, marbles: &str, value: impl Fn(char) -> T) -> ColdObservable<T> {
        self.cold_with_error(marbles, value, default_error())
    }

    /// A cold source erroring with `error` on `#`.
    pub fn cold_with_error<T: Clone + 'static>(
        &self,
        marbles: &str,
        value: impl Fn(char) -> T,
        error: StreamError,
    ) -> ColdObservable<T> {
        let messages = Rc::new(self.parse_marbles_with_error(marbles, value, &error));
        let logs = SubscriptionLogs::default();
        let scheduler = self.scheduler();
        let timeline = scheduler.clone();

        let observable = logged(scheduler, Rc::clone(&logs), move |subscriber: &Subscriber<T>| {
            for message in messages.iter() {
                let target = subscriber.clone();
                let action = timeline.schedule(
                    message.time,
                    message.notification.clone(),
                    move |_, notification| notification.clone().deliver(&target),
                );
                subscriber.add(&action);
            }
        });

        ColdObservable { observable, logs }
    }

    /// A hot source erroring with the default test error on `#`.
    pub fn hot<T: Clone + 'static>(&self, marbles: &str, value: impl Fn(char) -> T) -> HotObservable<T> {
        self.hot_with_error(marbles, value, default_error())
    }

    /// A hot source erroring with `error` on `#`.
    pub fn hot_with_error<T: Clone + 'static>(
        &self,
        marbles: &str,
        value: impl Fn(char) -> T,
        error: StreamError,
    ) -> HotObservable<T> {
        let subject = Subject::new();
        for message in self.parse_marbles_with_error(marbles, value, &error) {
            let target = subject.clone();
            self.scheduler()
                .schedule(message.time, message.notification, move |_, notification| {
                    match notification.clone() {
                        Notification::Next(value) => target.next(value),
                        Notification::Error(err) => target.error(err),
                        Notification::Complete => target.complete(),
                    }
                });
        }

        let logs = SubscriptionLogs::default();
        let observable = logged(self.scheduler(), Rc::clone(&logs), move |subscriber: &Subscriber<T>| {
            subject.as_observable().subscribe_with(subscriber.clone());
        });

        HotObservable { observable, logs }
    }

    /// Subscribe to `source` at the current frame and record what it emits.
    pub fn record<T: Clone + 'static>(&self, source: &Observable<T>) -> Recorder<T> {
        self.record_inner(source, None)
    }

    /// Like [`record`](Self::record), unsubscribing at the `!` of `unsubscription`.
    pub fn record_until<T: Clone + 'static>(&self, source: &Observable<T>, unsubscription: &str) -> Recorder<T> {
        self.record_inner(source, self.marker(unsubscription, '!'))
    }

    /// Record a stream of streams, recording each inner stream from the
    /// moment it is emitted.
    pub fn record_nested<T: Clone + 'static>(&self, source: &Observable<Observable<T>>) -> Recorder<Recorder<T>> {
        self.record(&self.nested(source))
    }

    /// Like [`record_nested`](Self::record_nested) with an unsubscription diagram.
    pub fn record_nested_until<T: Clone + 'static>(
        &self,
        source: &Observable<Observable<T>>,
        unsubscription: &str,
    ) -> Recorder<Recorder<T>> {
        self.record_until(&self.nested(source), unsubscription)
    }

    fn nested<T: Clone + 'static>(&self, source: &Observable<Observable<T>>) -> Observable<Recorder<T>> {
        let scheduler = self.scheduler();
        source.map(move |inner: Observable<T>| {
            let recorder = Recorder::new(scheduler.clone());
            inner.subscribe(recorder.observer());
            recorder
        })
    }

    fn record_inner<T: Clone + 'static>(&self, source: &Observable<T>, until: Option<Duration>) -> Recorder<T> {
        let recorder = Recorder::new(self.scheduler());
        let subscriber = Subscriber::new(recorder.observer());

        let source = source.clone();
        let target = subscriber.clone();
        self.scheduler().schedule(Duration::ZERO, (), move |_, _| {
            source.subscribe_with(target.clone());
        });

        if let Some(at) = until {
            self.scheduler().schedule(at, subscriber, |_, subscriber| {
                report(subscriber.unsubscribe());
            });
        }
        recorder
    }

    fn frames(&self, frames: i64) -> Option<Duration> {
        u32::try_from(frames).ok().map(|frames| self.config.frame * frames)
    }
}

impl Default for TestScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn default_error() -> StreamError {
    StreamError::message("error")
}
