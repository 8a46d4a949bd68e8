//! Operators beyond the simple transforms on [`Observable`](crate::Observable).
//!
//! Each submodule adds methods to `Observable` through its own `impl` block:
//!
//! - [`merge`]: concurrent and serial flattening (`merge_all`, `concat_all`, `expand`, ...)
//! - [`combine_latest`]: latest-value join over several sources
//! - [`window`]: windowing and buffering by time or count
//! - [`sample`]: latest value whenever a notifier fires
//! - [`throttle`]: first value per time window

pub mod combine_latest;
pub mod merge;
pub mod sample;
pub mod throttle;
pub mod window;

pub use merge::UNBOUNDED;
