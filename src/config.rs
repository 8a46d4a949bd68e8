//! Configuration traits and the configuration types of Rivulet.
//!
//! Operators and schedulers that take more than one tuning knob receive a
//! config value. Every config implements [`Config`], whose `validate` is
//! checked before the value is used.

use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// Base trait for configuration types.
///
/// # Example
///
/// ```rust
/// use rivulet::{Config, ConfigError};
///
/// #[derive(Debug, Clone)]
/// struct PoolConfig {
///     workers: usize,
/// }
///
/// impl Config for PoolConfig {
///     fn name(&self) -> &str {
///         "pool"
///     }
///
///     fn validate(&self) -> Result<(), ConfigError> {
///         if self.workers == 0 {
///             return Err(ConfigError::InvalidValue {
///                 field: "workers",
///                 reason: "must be greater than 0".to_string(),
///             });
///         }
///         Ok(())
///     }
/// }
///
/// assert!(PoolConfig { workers: 0 }.validate().is_err());
/// ```
pub trait Config {
    /// Returns the configuration name/identifier.
    fn name(&self) -> &str {
        "default"
    }

    /// Validates the configuration.
    fn validate(&self) -> ConfigResult<()> {
        Ok(())
    }
}

/// Builder trait for constructing configurations.
pub trait ConfigBuilder {
    /// The configuration type this builder produces.
    type Config: Config;

    /// Build and validate the configuration.
    fn build(self) -> ConfigResult<Self::Config>;
}

/// Settings of a [`VirtualTimeScheduler`](crate::VirtualTimeScheduler).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualTimeConfig {
    /// `flush` stops before running anything due after this time.
    /// `None` means flush until the queue is empty.
    pub max_time: Option<Duration>,
}

impl VirtualTimeConfig {
    /// Create an unbounded configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop flushing at `max_time`.
    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }
}

impl Config for VirtualTimeConfig {
    fn name(&self) -> &str {
        "virtual-time"
    }
}

/// Settings of the marble-diagram [`TestScheduler`](crate::testing::TestScheduler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarbleConfig {
    /// Virtual time covered by one marble character.
    pub frame: Duration,
    /// Number of frames `flush` runs before giving up on endless sources.
    pub max_frames: u32,
}

impl MarbleConfig {
    /// The conventional 10ms frame and 750 frame budget.
    pub fn new() -> Self {
        Self {
            frame: Duration::from_millis(10),
            max_frames: 750,
        }
    }

    /// Set the duration of one frame.
    pub fn with_frame(mut self, frame: Duration) -> Self {
        self.frame = frame;
        self
    }

    /// Set the frame budget of `flush`.
    pub fn with_max_frames(mut self, max_frames: u32) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// The virtual time at which flushing stops.
    pub fn max_time(&self) -> Duration {
        self.frame * self.max_frames
    }
}

impl Default for MarbleConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Config for MarbleConfig {
    fn name(&self) -> &str {
        "marble"
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.frame.is_zero() {
            return Err(ConfigError::invalid("frame", "must be greater than zero"));
        }
        if self.max_frames == 0 {
            return Err(ConfigError::invalid("max_frames", "must be greater than zero"));
        }
        Ok(())
    }
}

/// How a windowing or buffering operator partitions its source.
///
/// - `span`: how long a partition stays open.
/// - `creation_interval`: when set, a new partition opens every interval
///   (partitions overlap when it is shorter than `span`, leave gaps when
///   longer); when unset, a fresh partition opens as soon as one closes.
/// - `max_size`: a partition closes early once it holds this many values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowConfig {
    pub span: Duration,
    pub creation_interval: Option<Duration>,
    pub max_size: Option<usize>,
}

impl WindowConfig {
    /// Partitions of `span`, back to back, unbounded in size.
    pub fn new(span: Duration) -> Self {
        Self {
            span,
            creation_interval: None,
            max_size: None,
        }
    }

    /// Start a builder.
    pub fn builder(span: Duration) -> WindowConfigBuilder {
        WindowConfigBuilder {
            config: Self::new(span),
        }
    }

    /// Open a new partition every `interval`.
    pub fn with_creation_interval(mut self, interval: Duration) -> Self {
        self.creation_interval = Some(interval);
        self
    }

    /// Close a partition once it holds `max_size` values.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }
}

impl Config for WindowConfig {
    fn name(&self) -> &str {
        "window"
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.span.is_zero() {
            return Err(ConfigError::invalid("span", "must be greater than zero"));
        }
        if self.creation_interval.is_some_and(|i| i.is_zero()) {
            return Err(ConfigError::invalid(
                "creation_interval",
                "must be greater than zero",
            ));
        }
        if self.max_size == Some(0) {
            return Err(ConfigError::invalid("max_size", "must be greater than zero"));
        }
        Ok(())
    }
}

/// Builder for [`WindowConfig`].
#[derive(Debug, Clone)]
pub struct WindowConfigBuilder {
    config: WindowConfig,
}

impl WindowConfigBuilder {
    /// Open a new partition every `interval`.
    pub fn creation_interval(mut self, interval: Duration) -> Self {
        self.config.creation_interval = Some(interval);
        self
    }

    /// Close a partition once it holds `max_size` values.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.config.max_size = Some(max_size);
        self
    }
}

impl ConfigBuilder for WindowConfigBuilder {
    type Config = WindowConfig;

    fn build(self) -> ConfigResult<WindowConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
