//! Prelude module for convenient imports.
//!
//! This module re-exports the most commonly used types and traits
//! from Rivulet for convenient glob imports.
//!
//! # Example
//!
//! ```rust
//! use rivulet::prelude::*;
//! ```

// Configuration
pub use crate::config::{Config, ConfigBuilder, WindowConfig, WindowConfigBuilder};

// Core protocol
pub use crate::notification::Notification;
pub use crate::observable::{Observable, Operator};
pub use crate::subject::Subject;
pub use crate::subscriber::{FnObserver, Observer, Subscriber};
pub use crate::subscription::{Subscription, Teardown};

// Scheduling
pub use crate::operators::UNBOUNDED;
pub use crate::scheduler::{Action, Scheduler, SchedulerPolicy};
pub use crate::virtual_time::VirtualTimeScheduler;

// Streams
pub use crate::stream::{into_stream, EventStream, EventStreamExt, StreamBuilder};

// Errors
pub use crate::error::{
    ConfigError, ConfigResult, RivuletError, RivuletResult, StreamError, StreamResult,
    UnsubscriptionError,
};
