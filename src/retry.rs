//! A retrying HTTP client for individual sub-requests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Request, Response};
use tracing::debug;

use crate::client::RequestClient;
use crate::error::{FetchError, FetchResult};

/// Delay policy between retry attempts.
#[derive(Debug, Clone, Copy)]
enum Backoff {
    /// The same delay before every retry.
    Constant(Duration),
    /// `initial * 2^(attempt - 1)`: doubles after each failed attempt.
    Exponential(Duration),
}

impl Backoff {
    /// Delay to wait before the given attempt (1-based; attempt 0 never waits).
    fn delay(self, attempt: u32) -> Duration {
        match self {
            Backoff::Constant(every) => every,
            Backoff::Exponential(initial) => initial * (1 << (attempt - 1)),
        }
    }
}

/// An HTTP client that retries failed requests with a bounded backoff.
///
/// Transport errors and non-2xx statuses outside `[400, 500)` are retried up
/// to `retries` additional times; a 4xx status is surfaced immediately as
/// [`FetchError::NonRetriableStatus`] since repeating the request cannot
/// change the answer. Each attempt runs under its own timeout.
///
/// Install one on a [`RangeTripper`](crate::RangeTripper) with `set_client`
/// so chunk fetches survive transient faults without sinking the whole
/// download.
#[derive(Debug, Clone)]
pub struct RetryClient {
    client: reqwest::Client,
    retries: u32,
    backoff: Backoff,
}

impl RetryClient {
    /// Creates a client that retries `retries` times, waiting `every` between
    /// attempts, with `timeout` applied to each attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(retries: u32, every: Duration, timeout: Duration) -> FetchResult<Self> {
        Self::with_backoff(retries, Backoff::Constant(every), timeout)
    }

    /// Creates a client that retries `retries` times, waiting `initially`
    /// before the first retry and exponentially longer before each one after,
    /// with `timeout` applied to each attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn with_exponential_backoff(
        retries: u32,
        initially: Duration,
        timeout: Duration,
    ) -> FetchResult<Self> {
        Self::with_backoff(retries, Backoff::Exponential(initially), timeout)
    }

    fn with_backoff(retries: u32, backoff: Backoff, timeout: Duration) -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            retries,
            backoff,
        })
    }

    /// Runs a single attempt and classifies the outcome.
    async fn attempt(&self, request: Request) -> FetchResult<Response> {
        let response = self.client.execute(request).await?;
        let status = response.status();

        if status.is_client_error() {
            return Err(FetchError::NonRetriableStatus {
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown error").into(),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl RequestClient for RetryClient {
    async fn execute(&self, request: Request) -> FetchResult<Response> {
        let mut last_error = None;

        for attempt in 0..=self.retries {
            if attempt > 0 {
                tokio::time::sleep(self.backoff.delay(attempt)).await;
            }

            // A request with a streamed body cannot be replayed; hand it to
            // the underlying client once and let that attempt stand.
            let Some(req) = request.try_clone() else {
                return self.attempt(request).await;
            };

            match self.attempt(req).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    // Only retry on outcomes that can change: transport
                    // faults and 3xx/5xx statuses.
                    let should_retry =
                        matches!(&e, FetchError::Network(_) | FetchError::Http { .. });

                    if should_retry && attempt < self.retries {
                        debug!(attempt, error = %e, "request attempt failed, retrying");
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::Http {
            status: 0,
            message: "Max retries exceeded".into(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_backoff_is_flat() {
        let backoff = Backoff::Constant(Duration::from_millis(10));
        assert_eq!(backoff.delay(1), Duration::from_millis(10));
        assert_eq!(backoff.delay(2), Duration::from_millis(10));
        assert_eq!(backoff.delay(5), Duration::from_millis(10));
    }

    #[test]
    fn exponential_backoff_doubles() {
        let backoff = Backoff::Exponential(Duration::from_millis(10));
        assert_eq!(backoff.delay(1), Duration::from_millis(10));
        assert_eq!(backoff.delay(2), Duration::from_millis(20));
        assert_eq!(backoff.delay(3), Duration::from_millis(40));
        assert_eq!(backoff.delay(4), Duration::from_millis(80));
    }
}
