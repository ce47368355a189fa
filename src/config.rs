//! Retry and tracing configuration.

use crate::backoff::{BackoffPolicy, Jitter, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_RETRY_TIME};
use crate::source::SNAPSHOT_CAP;
use crate::trace::TraceFlags;
use crate::Error;
use std::str::FromStr;
use std::time::Duration;

/// Default summary length for traced bodies.
pub const DEFAULT_TRUNCATE_LENGTH: usize = 1024;

/// Configuration for retrying transient failures.
///
/// # Examples
///
/// ```
/// use gridcall::config::RetryConfig;
/// use std::time::Duration;
///
/// let config = RetryConfig::builder()
///     .max_retry_time(Duration::from_secs(30))
///     .build();
/// assert_eq!(config.policy().budget(), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum total time for a request, including backoff waits. Defaults to 15 seconds.
    pub max_retry_time: Duration,

    /// Backoff unit. Retry `n` waits `2^n` units plus jitter. Defaults to 1 second.
    pub backoff_base: Duration,

    /// Jitter added to each delay. Defaults to random.
    pub jitter: Jitter,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry_time: DEFAULT_MAX_RETRY_TIME,
            backoff_base: DEFAULT_BACKOFF_BASE,
            jitter: Jitter::Random,
        }
    }
}

impl RetryConfig {
    /// Creates a new builder.
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// The backoff policy described by this configuration.
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.max_retry_time)
            .with_base(self.backoff_base)
            .with_jitter(self.jitter)
    }
}

/// Builder for [`RetryConfig`].
#[derive(Default)]
pub struct RetryConfigBuilder {
    max_retry_time: Option<Duration>,
    backoff_base: Option<Duration>,
    jitter: Option<Jitter>,
}

impl RetryConfigBuilder {
    /// Sets the total time budget.
    pub fn max_retry_time(mut self, max_retry_time: Duration) -> Self {
        self.max_retry_time = Some(max_retry_time);
        self
    }

    /// Sets the backoff unit.
    pub fn backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = Some(base);
        self
    }

    /// Sets the jitter source.
    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Builds the `RetryConfig`.
    pub fn build(self) -> RetryConfig {
        let default = RetryConfig::default();
        RetryConfig {
            max_retry_time: self.max_retry_time.unwrap_or(default.max_retry_time),
            backoff_base: self.backoff_base.unwrap_or(default.backoff_base),
            jitter: self.jitter.unwrap_or(default.jitter),
        }
    }
}

/// How much of a body a summary keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncateLength {
    /// Keep at most this many characters.
    Limit(usize),
    /// Keep everything.
    Unlimited,
}

impl Default for TruncateLength {
    fn default() -> Self {
        TruncateLength::Limit(DEFAULT_TRUNCATE_LENGTH)
    }
}

impl FromStr for TruncateLength {
    type Err = Error;

    /// Parses a character count; `-1` means unlimited.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "-1" {
            return Ok(TruncateLength::Unlimited);
        }
        s.parse::<usize>().map(TruncateLength::Limit).map_err(|e| {
            Error::ConfigurationError(format!("Invalid trace truncate length {:?}: {}", s, e))
        })
    }
}

/// Configuration for diagnostic capture.
///
/// # Examples
///
/// ```
/// use gridcall::config::{TraceConfig, TruncateLength};
/// use gridcall::trace::TraceFlag;
///
/// let config = TraceConfig::parse("Request,ResponseBody", Some("-1")).unwrap();
/// assert!(config.flags.contains(TraceFlag::RequestHeaders));
/// assert_eq!(config.truncate, TruncateLength::Unlimited);
///
/// assert!(!TraceConfig::default().is_enabled());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceConfig {
    /// Which parts of each exchange to record. Defaults to none.
    pub flags: TraceFlags,

    /// Length of body summaries. Defaults to 1024 characters.
    pub truncate: TruncateLength,

    /// Maximum bytes copied from a body for tracing. Defaults to 10 KB.
    pub snapshot_limit: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            flags: TraceFlags::empty(),
            truncate: TruncateLength::default(),
            snapshot_limit: SNAPSHOT_CAP,
        }
    }
}

impl TraceConfig {
    /// Creates a new builder.
    pub fn builder() -> TraceConfigBuilder {
        TraceConfigBuilder::default()
    }

    /// Builds a configuration from string settings.
    ///
    /// `parts` is a flag list as accepted by [`TraceFlags::parse`]; `truncate`
    /// is a character count or `-1`, defaulting to 1024 when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if `truncate` is not a valid length.
    pub fn parse(parts: &str, truncate: Option<&str>) -> Result<Self, Error> {
        let truncate = match truncate {
            Some(value) if !value.trim().is_empty() => value.parse()?,
            _ => TruncateLength::default(),
        };
        Ok(Self {
            flags: TraceFlags::parse(parts),
            truncate,
            ..Default::default()
        })
    }

    /// Returns `true` if any flag is set.
    pub fn is_enabled(&self) -> bool {
        !self.flags.is_empty()
    }
}

/// Builder for [`TraceConfig`].
#[derive(Default)]
pub struct TraceConfigBuilder {
    flags: Option<TraceFlags>,
    truncate: Option<TruncateLength>,
    snapshot_limit: Option<usize>,
}

impl TraceConfigBuilder {
    /// Sets the traced parts.
    pub fn flags(mut self, flags: TraceFlags) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Sets the summary length.
    pub fn truncate(mut self, truncate: TruncateLength) -> Self {
        self.truncate = Some(truncate);
        self
    }

    /// Sets the snapshot size limit.
    pub fn snapshot_limit(mut self, limit: usize) -> Self {
        self.snapshot_limit = Some(limit);
        self
    }

    /// Builds the `TraceConfig`.
    pub fn build(self) -> TraceConfig {
        let default = TraceConfig::default();
        TraceConfig {
            flags: self.flags.unwrap_or(default.flags),
            truncate: self.truncate.unwrap_or(default.truncate),
            snapshot_limit: self.snapshot_limit.unwrap_or(default.snapshot_limit),
        }
    }
}
