//! The seam between the engine and whatever executes a single HTTP request.

use async_trait::async_trait;
use reqwest::{Request, Response};

use crate::error::FetchResult;

/// A thing that can execute one HTTP request.
///
/// The engine routes every sub-request it makes — the HEAD probe, the
/// head-fake range GET, whole-body fallbacks, and each chunk fetch — through
/// this trait, so callers can swap in a retrying client (see
/// [`RetryClient`](crate::RetryClient)) or anything else that satisfies the
/// contract.
///
/// Implementations must not consume the request on transient failures they
/// handle internally; the engine hands over a fresh `Request` per call.
#[async_trait]
pub trait RequestClient: Send + Sync {
    /// Executes the request and returns the response.
    ///
    /// A response is returned for any status the transport could carry;
    /// classifying non-2xx statuses is the caller's business unless the
    /// implementation documents otherwise.
    async fn execute(&self, request: Request) -> FetchResult<Response>;
}

#[async_trait]
impl RequestClient for reqwest::Client {
    async fn execute(&self, request: Request) -> FetchResult<Response> {
        Ok(reqwest::Client::execute(self, request).await?)
    }
}
