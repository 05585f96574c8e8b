//! Retry logic with exponential backoff
//!
//! This module provides configurable retry logic for transient failures.
//! It implements exponential backoff with optional jitter to prevent thundering herd,
//! and honors server-supplied delays (`Retry-After`) when the error carries one.
//!
//! # Example
//!
//! ```no_run
//! use gyazo_drain::retry::{IsRetryable, with_retry};
//! use gyazo_drain::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let result = with_retry(&config, || async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, 5xx, rate limits, connection reset) should return `true`.
/// Permanent failures (authentication rejected, 404, corrupt data) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;

    /// Server-supplied delay to wait before the next attempt, if any
    ///
    /// When present it replaces the computed backoff delay for that attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Transient(_) => true,
            Error::RateLimited { .. } => true,
            // Unclassified reqwest errors: only timeouts and connect failures
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            // Some I/O errors are transient (socket-level failures surfacing through the stream)
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Rejected credentials will be rejected again
            Error::Auth(_) => false,
            Error::NotFound(_) => false,
            Error::HttpStatus { .. } => false,
            // A short or empty body is not retried at this layer; a later run picks it up
            Error::Verification(_) => false,
            Error::Config { .. } => false,
            Error::Database(_) | Error::Sqlx(_) => false,
            Error::Serialization(_) => false,
            Error::Cancelled => false,
            Error::Other(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Outcome of a retried operation together with the number of attempts spent
#[derive(Debug)]
pub struct Attempted<T, E> {
    /// Final result (success, or the last error)
    pub result: Result<T, E>,
    /// Total attempts made, including the first one
    pub attempts: u32,
}

/// Execute an async operation with exponential backoff retry logic
///
/// # Arguments
///
/// * `config` - Retry configuration (max attempts, delays, backoff multiplier, jitter)
/// * `operation` - Async closure that returns Result<T, E> where E implements IsRetryable
///
/// # Returns
///
/// Returns the successful result or the last error after all retry attempts are exhausted.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    with_retry_counted(config, operation).await.result
}

/// Same as [`with_retry`], but also reports how many attempts were made
///
/// `config.max_attempts` counts retries, so an operation is called at most
/// `max_attempts + 1` times.
pub async fn with_retry_counted<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> Attempted<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Attempted {
                    result: Ok(result),
                    attempts: attempt + 1,
                };
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                // Server-supplied delay wins over our own schedule
                let wait = match e.retry_after() {
                    Some(server_delay) => bounded_server_delay(server_delay),
                    None if config.jitter => add_jitter(delay),
                    None => delay,
                };

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = wait.as_millis() as u64,
                    "Operation failed, retrying"
                );

                tokio::time::sleep(wait).await;

                // Calculate next delay with exponential backoff
                delay = next_backoff(delay, config);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(
                        error = %e,
                        "Operation failed with non-retryable error"
                    );
                }
                return Attempted {
                    result: Err(e),
                    attempts: attempt + 1,
                };
            }
        }
    }
}

/// Longest server-supplied delay honoured before a retry
///
/// A `Retry-After` beyond this is treated as this long, so one bad header
/// cannot park a worker for days.
pub const MAX_SERVER_DELAY: Duration = Duration::from_secs(15 * 60);

fn bounded_server_delay(delay: Duration) -> Duration {
    delay.min(MAX_SERVER_DELAY)
}

/// Backoff delay following `delay`, capped at `config.max_delay`
fn next_backoff(delay: Duration, config: &RetryConfig) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
        .map_or(config.max_delay, |next| next.min(config.max_delay))
}

/// Read a `Retry-After` header (delta-seconds or HTTP-date)
///
/// Dates in the past yield a zero delay. Unparseable values are ignored.
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let value = headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::try_from_secs_f64(jittered_secs).unwrap_or(delay)
}
