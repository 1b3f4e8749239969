//! Concurrent byte-range downloads behind a plain HTTP GET.
//!
//! This crate accelerates the download of a single resource by splitting it
//! into byte-range sub-requests executed concurrently, while staying
//! transparent for servers that do not support ranges. The caller issues one
//! GET; the transport probes the URL (HEAD, with a small-range "head-fake"
//! GET as fallback for servers that reject HEAD), partitions the declared
//! length into chunks, fans them out over semaphore-gated workers, assembles
//! the bytes in a file or an in-memory buffer, verifies the size, and hands
//! back a synthesized response.
//!
//! # Features
//!
//! - **Parallel range fetches**: 1/Nth of the file per worker, plus one gap
//!   worker when the length does not divide evenly
//! - **Transparent fallback**: servers without `Accept-Ranges: bytes` get a
//!   single whole-body GET
//! - **Head-fake recovery**: object stores that 403 a HEAD but serve ranged
//!   GETs (signed URLs) still download in parallel
//! - **Retries with backoff**: wrap sub-requests in a [`RetryClient`] so
//!   transient faults do not sink the whole download
//! - **Progress stream**: per-chunk byte counts over a bounded channel
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use rangefetch::{FetchRequest, RangeTripper, RetryClient};
//!
//! # async fn example() -> Result<(), rangefetch::FetchError> {
//! let mut tripper = RangeTripper::new(10);
//! tripper.set_client(RetryClient::new(
//!     3,
//!     Duration::from_millis(250),
//!     Duration::from_secs(30),
//! )?);
//!
//! let request = FetchRequest::get("https://example.com/large.bin")?
//!     .output_file("large.bin");
//! let response = tripper.round_trip(request).await?;
//! assert!(response.status().is_success());
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod plan;
mod probe;
mod progress;
mod retry;
mod sink;
mod tripper;

pub use client::RequestClient;
pub use error::{FetchError, FetchResult};
pub use retry::RetryClient;
pub use tripper::{FetchRequest, FetchResponse, RangeTripper};
