//! Retry policy for outbound sends to a chat surface.
//!
//! Every failed send is classified once by [`classify_delivery_error`] and the
//! classification drives a single retry loop in [`DeliveryPolicy::deliver`].

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::observability::{
    DELIVERY_ATTEMPTS, DELIVERY_BACKOFF, DELIVERY_PERMISSION_DENIED, DELIVERY_RETRIES,
};

/// Platform error code for an action the account lacks permission for.
pub const MISSING_PERMISSIONS: u32 = 50013;

/// Platform error code for a send blocked by a channel's slow mode.
pub const SLOW_MODE: u32 = 20016;

/// Default number of attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Wait used when a rate limit or slow-mode error gives no usable duration.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Added to every slow-mode wait.
pub const SLOW_MODE_MARGIN: Duration = Duration::from_secs(1);

/// How a failed send should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryClass {
    /// Terminal; the caller should fall back to removing the trigger.
    PermissionDenied,
    /// Retry after the given wait.
    RateLimited(Duration),
    /// Retry after the given wait, margin included.
    SlowMode(Duration),
    /// Retry immediately.
    Other,
}

impl DeliveryClass {
    /// The wait to observe before the next attempt.
    pub fn wait(&self) -> Duration {
        match self {
            DeliveryClass::RateLimited(wait) | DeliveryClass::SlowMode(wait) => *wait,
            DeliveryClass::PermissionDenied | DeliveryClass::Other => Duration::ZERO,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            DeliveryClass::PermissionDenied => "permission_denied",
            DeliveryClass::RateLimited(_) => "rate_limited",
            DeliveryClass::SlowMode(_) => "slow_mode",
            DeliveryClass::Other => "other",
        }
    }
}

/// Classify a failed send.
pub fn classify_delivery_error(err: &Error) -> DeliveryClass {
    match err {
        Error::Permission { .. } => DeliveryClass::PermissionDenied,
        Error::Api {
            status_code: 403, ..
        } => DeliveryClass::PermissionDenied,
        Error::Platform {
            code: MISSING_PERMISSIONS,
            ..
        }
        | Error::Platform {
            status_code: 403, ..
        } => DeliveryClass::PermissionDenied,
        Error::Platform {
            code: SLOW_MODE,
            message,
            ..
        } => {
            let wait = parse_slow_mode_wait(message).unwrap_or(DEFAULT_WAIT);
            DeliveryClass::SlowMode(wait.saturating_add(SLOW_MODE_MARGIN))
        }
        Error::RateLimit { retry_after, .. } => {
            DeliveryClass::RateLimited(retry_after_duration(*retry_after))
        }
        Error::Api {
            status_code: 429, ..
        }
        | Error::Platform {
            status_code: 429, ..
        } => DeliveryClass::RateLimited(DEFAULT_WAIT),
        _ => DeliveryClass::Other,
    }
}

fn retry_after_duration(retry_after: Option<f64>) -> Duration {
    match retry_after {
        Some(secs) => Duration::try_from_secs_f64(secs).unwrap_or(DEFAULT_WAIT),
        None => DEFAULT_WAIT,
    }
}

/// Find the first integer immediately followed by "second" in `message`.
///
/// "Slowmode is active, try again in 7 seconds" gives 7 seconds. A space
/// between the number and the word is allowed.
fn parse_slow_mode_wait(message: &str) -> Option<Duration> {
    let lower = message.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let rest = lower[i..].trim_start_matches(' ');
        if rest.starts_with("second") {
            if let Ok(secs) = lower[start..i].parse::<u64>() {
                return Some(Duration::from_secs(secs));
            }
        }
    }
    None
}

/// Retry loop applied around every outbound send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    max_attempts: u32,
}

impl DeliveryPolicy {
    /// A policy with the default of three attempts.
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set the total number of attempts, including the first. Zero is treated
    /// as one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// The total number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Call `send_fn` until it succeeds, a permission error occurs, or the
    /// attempts run out.
    ///
    /// `send_fn` receives the 1-based attempt number. Returns `Ok(Some(_))` on
    /// success and `Ok(None)` when the send was refused for lack of
    /// permission. Rate-limit and slow-mode failures sleep for the advised
    /// wait before the next attempt; other failures retry at once.
    ///
    /// ```
    /// # use chatrelay::{DeliveryPolicy, Error};
    /// # tokio_test::block_on(async {
    /// let policy = DeliveryPolicy::new();
    /// let sent = policy
    ///     .deliver(|attempt| async move {
    ///         if attempt < 2 {
    ///             Err(Error::api(502, "bad gateway"))
    ///         } else {
    ///             Ok("message-id")
    ///         }
    ///     })
    ///     .await
    ///     .unwrap();
    /// assert_eq!(sent, Some("message-id"));
    ///
    /// let refused = policy
    ///     .deliver(|_| async { Err::<(), _>(Error::permission("Missing Permissions")) })
    ///     .await
    ///     .unwrap();
    /// assert_eq!(refused, None);
    /// # });
    /// ```
    ///
    /// # Errors
    ///
    /// The error from the final attempt once all attempts have failed.
    pub async fn deliver<F, Fut, T>(&self, mut send_fn: F) -> Result<Option<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            DELIVERY_ATTEMPTS.click();
            let err = match send_fn(attempt).await {
                Ok(value) => return Ok(Some(value)),
                Err(err) => err,
            };

            let class = classify_delivery_error(&err);
            if class == DeliveryClass::PermissionDenied {
                DELIVERY_PERMISSION_DENIED.click();
                tracing::info!(attempt, error = %err, "delivery refused for lack of permission");
                return Ok(None);
            }
            if attempt >= self.max_attempts {
                tracing::warn!(
                    attempt,
                    class = class.label(),
                    error = %err,
                    "delivery failed, giving up"
                );
                return Err(err);
            }

            let wait = class.wait();
            DELIVERY_RETRIES.click();
            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts,
                class = class.label(),
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "delivery failed, retrying"
            );
            if !wait.is_zero() {
                DELIVERY_BACKOFF.add(wait.as_secs_f64());
                tokio::time::sleep(wait).await;
            }
            attempt += 1;
        }
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::new()
    }
}
