//! Error types for range transport operations.

use thiserror::Error;

/// Result type for transport operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Errors that can occur while probing, fetching, or assembling a download.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server sent a `Content-Length` header that is not a number.
    #[error("Content-Length value '{value}' cannot be converted to a number")]
    ContentLengthNumeric {
        /// The raw header value as received
        value: String,
    },

    /// The assembled output does not match the declared `Content-Length`.
    #[error("downloaded size does not match content-length: actual {actual}, expected {expected}")]
    ContentLengthMismatch {
        /// Bytes actually present in the sink
        actual: u64,
        /// Bytes the server declared
        expected: u64,
    },

    /// The probe ended inconclusively and head-fake recovery did not help.
    #[error("HEAD probe failed with status {status}")]
    HeadFailed {
        /// Status code of the failed HEAD response
        status: u16,
    },

    /// A status in `[400, 500)` was received; retrying will not help.
    #[error("non-retriable HTTP status received: {status}")]
    NonRetriableStatus {
        /// The 4xx status code
        status: u16,
    },

    /// Any other non-2xx HTTP response.
    #[error("HTTP error: {status} - {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Canonical reason phrase or error detail
        message: String,
    },

    /// The head-fake probe got an answer, but not one that settles range
    /// support either way. The orchestrator falls back to the error that
    /// preceded the head-fake attempt.
    #[error("head-fake probe was inconclusive")]
    HeadFakeInconclusive,

    /// Network error during an HTTP request.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error while writing to the output sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The request URL could not be parsed.
    #[error("invalid request URL: {url}")]
    InvalidUrl {
        /// The offending URL text
        url: String,
    },

    /// The download was cancelled before it completed.
    #[error("download cancelled")]
    Cancelled,
}
