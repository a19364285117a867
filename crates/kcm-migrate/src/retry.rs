//! Rate-limited retry for cluster fetches.
//!
//! A failed list request is never given up on: the caller waits for a token
//! from a [`TokenBucket`] and issues the identical request again. The bucket
//! bounds load on an API server that is struggling or recovering, and a
//! [`CancellationToken`] is the only way out of the loop besides success.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::error::{Error, Result};

/// Token bucket allowing bursts up to `capacity` while capping the long-run
/// average at `rate` tokens per second.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket.
    ///
    /// `rate` must be positive; `capacity` is raised to at least one token.
    #[must_use]
    pub fn new(rate: f64, capacity: u32) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            rate,
            capacity,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Creates a bucket from configuration.
    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.rate, config.burst)
    }

    /// Tokens currently available (after refilling).
    pub fn available(&mut self) -> f64 {
        self.refill();
        self.tokens
    }

    /// Takes a token if one is available.
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until the next token is available.
    pub fn time_until_available(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((1.0 - self.tokens) / self.rate)
    }

    /// Waits until a token is available and takes it.
    pub async fn acquire(&mut self) {
        loop {
            if self.try_acquire() {
                return;
            }
            let wait = self.time_until_available();
            // Refill granularity can leave a sliver short of a full token.
            sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
    }
}

/// States of the fetch retry loop.
///
/// `Idle -> WaitingForToken -> Requesting -> {Done | WaitingForToken}`.
/// There is no failure state; only cancellation leaves the loop early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Nothing issued yet.
    Idle,
    /// Blocked on the rate limiter.
    WaitingForToken,
    /// Request in flight.
    Requesting,
    /// Request succeeded.
    Done,
}

/// Runs `operation` until it succeeds, taking a token before every attempt.
///
/// Errors from `operation` are logged and retried with the identical
/// request. Returns [`Error::Cancelled`] if `cancel` fires while waiting for
/// a token or while a request is in flight.
///
/// # Errors
///
/// Only [`Error::Cancelled`].
pub async fn retry_forever<F, Fut, T>(
    limiter: &mut TokenBucket,
    cancel: &CancellationToken,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut state = RetryState::Idle;
    let mut attempt: u64 = 0;

    loop {
        transition(operation_name, &mut state, RetryState::WaitingForToken);
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(Error::Cancelled(operation_name.to_string()));
            }
            () = limiter.acquire() => {}
        }

        attempt += 1;
        transition(operation_name, &mut state, RetryState::Requesting);
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(Error::Cancelled(operation_name.to_string()));
            }
            outcome = operation() => outcome,
        };

        match outcome {
            Ok(value) => {
                transition(operation_name, &mut state, RetryState::Done);
                if attempt > 1 {
                    debug!("{}: succeeded after {} attempts", operation_name, attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                warn!(
                    "{}: attempt {} failed: {}. Retrying",
                    operation_name, attempt, e
                );
            }
        }
    }
}

fn transition(operation_name: &str, state: &mut RetryState, next: RetryState) {
    debug!("{}: {:?} -> {:?}", operation_name, state, next);
    *state = next;
}
