//! # Rivulet
//!
//! **Rivulet** is a push-based reactive-stream runtime: compose event
//! sequences through chainable operators, with deterministic cancellation and
//! pluggable time.
//!
//! ## Overview
//!
//! - **Observable**: a lazy, re-subscribable producer of values
//! - **Subscriber**: an observer guarded by a terminal state; nothing is
//!   delivered after `error`, `complete` or `unsubscribe`
//! - **Subscription**: a tree of resources released exactly once, in order
//! - **Operator**: wraps a downstream subscriber into an upstream one;
//!   `lift` chains operators without running anything
//! - **Scheduler**: immediate, tokio-driven or virtual time, one `Action`
//!   model for all three
//!
//! ## Layer Structure
//!
//! ```text
//! operators/        merge, combine_latest, window/buffer, sample, throttle
//! observable        Observable, Operator, lift, creation helpers
//! subscriber        Observer, FnObserver, Subscriber
//! subscription      Subscription, Teardown
//! scheduler         Scheduler, Action, VirtualTimeScheduler
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rivulet::prelude::*;
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let s = Rc::clone(&seen);
//!
//! Observable::of(vec![1, 2, 3])
//!     .map(|x| x * 10)
//!     .concat_with(&Observable::of(vec![99]))
//!     .subscribe_next(move |v| s.borrow_mut().push(v));
//!
//! assert_eq!(*seen.borrow(), vec![10, 20, 30, 99]);
//! ```
//!
//! ## Features
//!
//! - Exactly-once teardown with aggregated failures
//! - Virtual-time scheduler and marble-diagram test tooling (`testing`)
//! - Bridge from observables to async `Stream`s (`stream`)

mod config;
mod error;
mod notification;
mod observable;
pub mod operators;
mod scheduler;
mod sources;
mod subject;
mod subscriber;
mod subscription;
mod virtual_time;
pub mod stream;
pub mod testing;

pub mod prelude;

// Re-export core types
pub use config::{Config, ConfigBuilder, MarbleConfig, VirtualTimeConfig, WindowConfig, WindowConfigBuilder};
pub use error::{
    ConfigError, ConfigResult, RivuletError, RivuletResult, StreamError, StreamResult,
    UnsubscriptionError,
};
pub use notification::Notification;
pub use observable::{Observable, Operator};
pub use operators::UNBOUNDED;
pub use scheduler::{Action, Scheduler, SchedulerPolicy};
pub use subject::Subject;
pub use subscriber::{FnObserver, Observer, Subscriber};
pub use subscription::{Subscription, Teardown};
pub use stream::{into_stream, EventStream, EventStreamExt, StreamBuilder};
pub use virtual_time::VirtualTimeScheduler;
