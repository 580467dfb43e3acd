//! Bounded polling.
//!
//! [`poll`] repeatedly fetches a value until a condition holds or a wall-clock
//! deadline passes. Fetch failures end the loop immediately; retrying a failed
//! fetch is the caller's concern (see [`retry`]).

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tracing::debug;

/// Default delay between attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5_000);

/// Default wall-clock budget for one poll.
pub const DEFAULT_MAX_POLL_DURATION: Duration = Duration::from_millis(600_000);

/// Why a poll ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollReason {
    ConditionMet,
    Timeout,
    Error,
}

/// Outcome of a bounded poll.
///
/// A timeout is a regular result carrying the last fetched value, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResult<T> {
    pub success: bool,
    /// Satisfying value on success, otherwise the last value fetched (if any).
    pub value: Option<T>,
    /// Number of fetches performed.
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub reason: PollReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> PollResult<T> {
    /// Map the carried value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> PollResult<U> {
        PollResult {
            success: self.success,
            value: self.value.map(f),
            attempts: self.attempts,
            elapsed_ms: self.elapsed_ms,
            reason: self.reason,
            error: self.error,
        }
    }
}

impl<T> PollResult<Option<T>> {
    /// Collapse a poll over optional values.
    #[must_use]
    pub fn flatten(self) -> PollResult<T> {
        PollResult {
            success: self.success,
            value: self.value.flatten(),
            attempts: self.attempts,
            elapsed_ms: self.elapsed_ms,
            reason: self.reason,
            error: self.error,
        }
    }
}

/// Interval and deadline for [`poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    pub max_duration: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_duration: DEFAULT_MAX_POLL_DURATION,
        }
    }
}

impl PollOptions {
    #[must_use]
    pub const fn new(interval: Duration, max_duration: Duration) -> Self {
        Self {
            interval,
            max_duration,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

/// Fetch until `is_done` accepts the value or `max_duration` elapses.
///
/// The deadline is checked before every fetch. The delay between attempts is
/// capped at the remaining budget, so a poll never overshoots its deadline by
/// a whole interval.
pub async fn poll<T, E, F, Fut, D>(mut fetch: F, mut is_done: D, options: PollOptions) -> PollResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    D: FnMut(&T) -> bool,
{
    let start = Instant::now();
    let mut attempts = 0;
    let mut last = None;

    loop {
        let elapsed = start.elapsed();
        if elapsed >= options.max_duration {
            debug!(attempts, elapsed_ms = millis(elapsed), "Poll timed out");
            return PollResult {
                success: false,
                value: last,
                attempts,
                elapsed_ms: millis(elapsed),
                reason: PollReason::Timeout,
                error: None,
            };
        }

        attempts += 1;
        debug!(attempt = attempts, elapsed_ms = millis(elapsed), "Polling");

        match fetch().await {
            Ok(value) if is_done(&value) => {
                return PollResult {
                    success: true,
                    value: Some(value),
                    attempts,
                    elapsed_ms: millis(start.elapsed()),
                    reason: PollReason::ConditionMet,
                    error: None,
                };
            }
            Ok(value) => last = Some(value),
            Err(e) => {
                debug!(attempt = attempts, error = %e, "Poll fetch failed");
                return PollResult {
                    success: false,
                    value: last,
                    attempts,
                    elapsed_ms: millis(start.elapsed()),
                    reason: PollReason::Error,
                    error: Some(e.to_string()),
                };
            }
        }

        let remaining = options.max_duration.saturating_sub(start.elapsed());
        sleep(options.interval.min(remaining)).await;
    }
}

/// Run `op` up to `attempts` times, sleeping `delay` between failures.
///
/// Returns the first success or the last error.
pub async fn retry<T, E, F, Fut>(attempts: u32, delay: Duration, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                debug!(attempt, error = %e, "Retrying");
                attempt += 1;
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn counter() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(0))
    }

    #[tokio::test(start_paused = true)]
    async fn test_condition_met_on_first_fetch() {
        let calls = counter();
        let c = calls.clone();
        let result = poll(
            || {
                let c = c.clone();
                async move { Ok::<_, String>(c.fetch_add(1, Ordering::SeqCst)) }
            },
            |_| true,
            PollOptions::default(),
        )
        .await;

        assert!(result.success);
        assert_eq!(result.reason, PollReason::ConditionMet);
        assert_eq!(result.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_condition_met_after_several_attempts() {
        let calls = counter();
        let c = calls.clone();
        let result = poll(
            || {
                let c = c.clone();
                async move { Ok::<_, String>(c.fetch_add(1, Ordering::SeqCst) + 1) }
            },
            |n| *n == 3,
            PollOptions::new(Duration::from_millis(100), Duration::from_secs(10)),
        )
        .await;

        assert_eq!(result.value, Some(3));
        assert_eq!(result.attempts, 3);
        assert_eq!(result.elapsed_ms, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_caps_sleep_at_deadline() {
        let result = poll(
            || async { Ok::<_, String>("inProgress") },
            |_| false,
            PollOptions::new(Duration::from_millis(10_000), Duration::from_millis(1_000)),
        )
        .await;

        assert!(!result.success);
        assert_eq!(result.reason, PollReason::Timeout);
        assert_eq!(result.value, Some("inProgress"));
        assert_eq!(result.attempts, 1);
        assert_eq!(result.elapsed_ms, 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_never_fetches() {
        let result = poll(
            || async { Ok::<u32, String>(1) },
            |_| true,
            PollOptions::new(Duration::from_millis(10), Duration::ZERO),
        )
        .await;

        assert_eq!(result.reason, PollReason::Timeout);
        assert_eq!(result.attempts, 0);
        assert!(result.value.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_stops_immediately() {
        let calls = counter();
        let c = calls.clone();
        let result: PollResult<u32> = poll(
            || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        Ok(7)
                    } else {
                        Err("connection reset")
                    }
                }
            },
            |_| false,
            PollOptions::new(Duration::from_millis(50), Duration::from_secs(60)),
        )
        .await;

        assert_eq!(result.reason, PollReason::Error);
        assert_eq!(result.error.as_deref(), Some("connection reset"));
        assert_eq!(result.value, Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_flatten_and_serialization() {
        let result = PollResult {
            success: false,
            value: Some(None::<u32>),
            attempts: 2,
            elapsed_ms: 10,
            reason: PollReason::Timeout,
            error: None,
        }
        .flatten();
        assert!(result.value.is_none());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["reason"], "timeout");
        assert_eq!(json["elapsedMs"], 10);
        assert!(json.get("error").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_returns_first_success() {
        let calls = counter();
        let c = calls.clone();
        let result = retry(3, Duration::from_secs(1), || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("not yet")
                } else {
                    Ok("ready")
                }
            }
        })
        .await;

        tokio_test::assert_ok!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up() {
        let calls = counter();
        let c = calls.clone();
        let result: Result<(), &str> = retry(3, Duration::from_secs(1), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err("down")
            }
        })
        .await;

        assert_eq!(result, Err("down"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
