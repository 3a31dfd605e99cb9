//! Bounded retry around a single remote request.

use crate::cache::Clock;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Network failure, non-success HTTP status or undecodable body.
    #[error("transport error: {0}")]
    Transport(String),
    /// The body decoded but did not have the expected shape.
    #[error("unexpected response: {0}")]
    Shape(String),
    /// Terminal: every allowed attempt failed.
    #[error("gave up after {attempts} attempts ({last})")]
    ExhaustedRetries { attempts: u32, last: Box<FetchError> },
}

impl FetchError {
    pub fn reason(&self) -> &'static str {
        match self {
            FetchError::Transport(_) => "transport",
            FetchError::Shape(_) => "shape",
            FetchError::ExhaustedRetries { .. } => "exhausted_retries",
        }
    }

    #[cfg(test)]
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchError::ExhaustedRetries { .. })
    }

    pub fn shape(msg: impl Into<String>) -> Self {
        FetchError::Shape(msg.into())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Transport(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per cycle, the first one included. Zero is treated as one.
    pub max_attempts: u32,
    /// Pause between attempts. Zero retries immediately.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::ZERO,
        }
    }
}

/// Failed-attempt counter that never exceeds its bound.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryCounter {
    attempts: u32,
    max: u32,
}

impl RetryCounter {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max: max_attempts.max(1),
        }
    }

    /// Records a failed attempt; returns whether another attempt is allowed.
    pub fn record_failure(&mut self) -> bool {
        self.attempts = (self.attempts + 1).min(self.max);
        self.attempts < self.max
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

/// A validated value plus the wall-clock time it was received.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub fetched_at_ms: i64,
}

/// Runs `request` until `validate` accepts its output or the policy's attempt
/// budget is spent.
///
/// `on_failure` sees every recoverable failure together with the number of
/// attempts used so far (1-based). Transport and shape failures never escape;
/// exhausting the budget yields [`FetchError::ExhaustedRetries`] wrapping the
/// last underlying failure.
pub async fn fetch_with_retry<R, T, Req, Fut, V, F>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    mut request: Req,
    validate: V,
    mut on_failure: F,
) -> Result<Fetched<T>, FetchError>
where
    Req: FnMut() -> Fut,
    Fut: Future<Output = Result<R, FetchError>>,
    V: Fn(R) -> Result<T, FetchError>,
    F: FnMut(u32, &FetchError),
{
    let mut counter = RetryCounter::new(policy.max_attempts);
    loop {
        let outcome = match request().await {
            Ok(raw) => validate(raw),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(value) => {
                counter.reset();
                return Ok(Fetched {
                    value,
                    fetched_at_ms: clock.now_ms(),
                });
            }
            Err(err) => {
                let can_retry = counter.record_failure();
                let attempts = counter.attempts();
                tracing::warn!(
                    attempt = attempts,
                    max = counter.max(),
                    reason = err.reason(),
                    error = %err,
                    "Fetch attempt failed"
                );
                on_failure(attempts, &err);
                if !can_retry {
                    counter.reset();
                    return Err(FetchError::ExhaustedRetries {
                        attempts,
                        last: Box::new(err),
                    });
                }
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }
}
