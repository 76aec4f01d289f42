//! Bounded retry for lock contention on the shared database.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::constants::retry::{BASE_DELAY_MS, JITTER_MS, MAX_DELAY_MS};
use crate::error::AppError;

/// Delay before retry number `attempt` (1-based): exponential with jitter.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let base = BASE_DELAY_MS.saturating_mul(1u64 << exponent).min(MAX_DELAY_MS);
    let jitter = rand::rng().random_range(0..=JITTER_MS);
    Duration::from_millis(base + jitter)
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is reached.
///
/// Only busy/locked database errors are retried; everything else is returned
/// immediately so validation failures are not repeated.
pub fn with_retry<T, F>(label: &str, max_attempts: u32, mut op: F) -> Result<T, AppError>
where
    F: FnMut() -> Result<T, AppError>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let wait = backoff_delay(attempt);
                warn!(
                    "Database busy during {}. Retrying in {:?} (attempt {}/{})",
                    label, wait, attempt, max_attempts
                );
                // Store access is synchronous and the binary runs one task on a
                // current-thread runtime, so there is no other task to starve.
                std::thread::sleep(wait);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn busy_error() -> AppError {
        AppError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ))
    }

    #[test]
    fn test_backoff_delay_grows_and_is_capped() {
        let first = backoff_delay(1);
        assert!(first >= Duration::from_millis(BASE_DELAY_MS));
        assert!(first <= Duration::from_millis(BASE_DELAY_MS + JITTER_MS));

        let late = backoff_delay(30);
        assert!(late <= Duration::from_millis(MAX_DELAY_MS + JITTER_MS));
    }

    #[test]
    fn test_retry_succeeds_after_busy() {
        let calls = Cell::new(0);
        let result = with_retry("test", 3, || {
            calls.set(calls.get() + 1);
            if calls.get() < 2 {
                Err(busy_error())
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_retry_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), AppError> = with_retry("test", 2, || {
            calls.set(calls.get() + 1);
            Err(busy_error())
        });
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_validation_error_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), AppError> = with_retry("test", 5, || {
            calls.set(calls.get() + 1);
            Err(AppError::validation("duplicate"))
        });
        assert!(result.unwrap_err().is_validation());
        assert_eq!(calls.get(), 1);
    }
}
