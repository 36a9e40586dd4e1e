//! Bounded retry with pluggable clock and delay sources.
//!
//! An operation is attempted at least once and re-attempted until it
//! succeeds, a total time budget elapses, or an attempt cap is hit,
//! whichever comes first. Operations report each failure as either
//! [`Failure::Transient`] (try again) or [`Failure::Fatal`] (stop now).
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use ci_tunnel::retry::{retry, Failure, RetryConfig};
//!
//! # async fn example() {
//! let config = RetryConfig::new(Duration::from_secs(10))
//!     .delay(Duration::from_millis(500))
//!     .max_attempts(5);
//! let value = retry(|| async { Ok::<_, Failure<String>>(42) }, &config).await;
//! assert_eq!(value.unwrap(), 42);
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{info, warn};

/// Ceiling for exponential backoff delays, regardless of the initial delay.
pub const MAX_BACKOFF_DELAY: Duration = Duration::from_secs(30);

/// Source of monotonic timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Suspends the current task for a duration.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`Clock`] backed by the tokio timer, so paused test runtimes apply.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How a single attempt failed.
#[derive(Debug)]
pub enum Failure<E> {
    /// Not ready yet; the loop may try again.
    Transient(E),
    /// Retrying cannot help; the loop stops immediately.
    Fatal(E),
}

impl<E> From<E> for Failure<E> {
    fn from(err: E) -> Self {
        Failure::Transient(err)
    }
}

/// Which bound ended the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhausted {
    Timeout(Duration),
    Attempts(u32),
    /// An attempt returned [`Failure::Fatal`].
    Aborted,
}

impl fmt::Display for Exhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exhausted::Timeout(limit) => write!(f, "timeout after {}ms", limit.as_millis()),
            Exhausted::Attempts(n) => write!(f, "{} attempts", n),
            Exhausted::Aborted => write!(f, "fatal failure"),
        }
    }
}

/// The loop gave up. Carries the last underlying failure.
#[derive(Debug)]
pub struct RetryError<E> {
    pub last: E,
    pub attempts: u32,
    pub reason: Exhausted,
}

impl<E> RetryError<E> {
    /// True when the loop stopped on a [`Failure::Fatal`] rather than a bound.
    pub fn is_fatal(&self) -> bool {
        self.reason == Exhausted::Aborted
    }

    pub fn into_inner(self) -> E {
        self.last
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Retry failed after {}: {}", self.reason, self.last)
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.last)
    }
}

/// Bounds and collaborators for one retry invocation.
#[derive(Clone)]
pub struct RetryConfig {
    /// Total time budget measured from the first attempt.
    pub timeout: Duration,
    /// Delay between attempts (initial delay when backing off).
    pub delay: Duration,
    /// Optional attempt cap, independent of `timeout`.
    pub max_attempts: Option<u32>,
    /// Suppresses per-attempt diagnostics.
    pub silent: bool,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryConfig {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            delay: Duration::from_secs(1),
            max_attempts: None,
            silent: false,
            clock: Arc::new(TokioClock),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("timeout", &self.timeout)
            .field("delay", &self.delay)
            .field("max_attempts", &self.max_attempts)
            .field("silent", &self.silent)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum Schedule {
    Fixed,
    Exponential,
}

/// Delay before the attempt following failed attempt `attempt` (1-based):
/// `min(initial * 2^(attempt-1), 30s)`.
pub fn backoff_delay(initial: Duration, attempt: u32) -> Duration {
    let factor = 2u32
        .checked_pow(attempt.saturating_sub(1))
        .unwrap_or(u32::MAX);
    initial
        .checked_mul(factor)
        .unwrap_or(MAX_BACKOFF_DELAY)
        .min(MAX_BACKOFF_DELAY)
}

/// Retry `operation` with a fixed delay between attempts.
pub async fn retry<T, E, F, Fut>(operation: F, config: &RetryConfig) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Failure<E>>>,
    E: fmt::Display,
{
    run(operation, config, Schedule::Fixed).await
}

/// Retry `operation`, doubling the delay after every failure up to
/// [`MAX_BACKOFF_DELAY`].
pub async fn retry_with_backoff<T, E, F, Fut>(
    operation: F,
    config: &RetryConfig,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Failure<E>>>,
    E: fmt::Display,
{
    run(operation, config, Schedule::Exponential).await
}

async fn run<T, E, F, Fut>(
    mut operation: F,
    config: &RetryConfig,
    schedule: Schedule,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Failure<E>>>,
    E: fmt::Display,
{
    let started = config.clock.now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 && !config.silent {
                    info!("Operation succeeded on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(Failure::Fatal(err)) => {
                return Err(RetryError {
                    last: err,
                    attempts: attempt,
                    reason: Exhausted::Aborted,
                });
            }
            Err(Failure::Transient(err)) => err,
        };

        if !config.silent {
            warn!("Attempt {} failed: {}", attempt, err);
        }

        let elapsed = config.clock.now().saturating_duration_since(started);
        if elapsed >= config.timeout {
            return Err(RetryError {
                last: err,
                attempts: attempt,
                reason: Exhausted::Timeout(config.timeout),
            });
        }
        if config.max_attempts.is_some_and(|max| attempt >= max) {
            return Err(RetryError {
                last: err,
                attempts: attempt,
                reason: Exhausted::Attempts(attempt),
            });
        }

        let delay = match schedule {
            Schedule::Fixed => config.delay,
            Schedule::Exponential => backoff_delay(config.delay, attempt),
        };
        config.sleeper.sleep(delay).await;
    }
}
