//! The range-aware transport: probe, plan, dispatch, assemble.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_RANGES, CONTENT_LENGTH, RANGE};
use reqwest::{Method, Request, StatusCode, Url};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::RequestClient;
use crate::error::{FetchError, FetchResult};
use crate::plan::{self, Chunk, ChunkPlan};
use crate::probe::{HeadFakeOutcome, Prober};
use crate::progress::ProgressSender;
use crate::sink::OutputSink;

/// Sequence of per-download ids carried in log events.
static DOWNLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

/// One-shot cell that fans worker failures into a single outcome.
///
/// The first recorded error wins; only its presence gates the dispatcher, so
/// later reports from sibling workers carry no extra information.
#[derive(Default)]
struct ErrorCell {
    slot: Mutex<Option<FetchError>>,
}

impl ErrorCell {
    fn record(&self, err: FetchError) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.get_or_insert(err);
        }
    }

    fn is_set(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_some()).unwrap_or(true)
    }

    fn take(&self) -> Option<FetchError> {
        self.slot.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// A GET to execute, plus the request-scoped pieces of a download: where the
/// bytes go, who hears about progress, and what can cancel it.
#[derive(Debug)]
pub struct FetchRequest {
    url: Url,
    headers: HeaderMap,
    output: Option<PathBuf>,
    progress: Option<mpsc::Sender<u64>>,
    cancel: Option<CancellationToken>,
}

impl FetchRequest {
    /// Creates a GET request for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidUrl`] if the URL does not parse.
    pub fn get(url: impl AsRef<str>) -> FetchResult<Self> {
        let url = Url::parse(url.as_ref()).map_err(|_| FetchError::InvalidUrl {
            url: url.as_ref().to_string(),
        })?;

        Ok(Self {
            url,
            headers: HeaderMap::new(),
            output: None,
            progress: None,
            cancel: None,
        })
    }

    /// Adds a header that is forwarded to every sub-request (probe and
    /// chunk fetches alike).
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replaces all forwarded headers at once.
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Writes the downloaded bytes to `path` (created or truncated) instead
    /// of an in-memory buffer. The returned response body will be empty.
    #[must_use]
    pub fn output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Attaches a progress channel. The first event is the total content
    /// length (0 when unknown); later events are per-chunk byte deltas that
    /// sum to the total on success. Use a bounded channel and keep receiving,
    /// or drop the receiver — either way the engine never stalls on it.
    #[must_use]
    pub fn progress(mut self, tx: mpsc::Sender<u64>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Attaches a cancellation token; cancelling it aborts in-flight chunk
    /// fetches and fails the download with [`FetchError::Cancelled`].
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// The synthesized response for a completed download.
///
/// Status and headers come from the probe (with `Content-Length` and
/// `Accept-Ranges` possibly synthesized during head-fake recovery). The body
/// holds the assembled bytes for buffer-mode downloads and is empty when an
/// output file was requested.
#[derive(Debug)]
pub struct FetchResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl FetchResponse {
    /// Status line of the probe response.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Headers of the probe response.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The assembled body (empty for file-mode downloads).
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consumes the response, returning the assembled body.
    #[must_use]
    pub fn into_body(self) -> Bytes {
        self.body
    }
}

/// A transport that downloads one resource over many concurrent byte-range
/// sub-requests, falling back to a plain GET for servers without range
/// support.
///
/// Construction is cheap and an instance carries no per-download state, so
/// one tripper can serve any number of sequential or concurrent
/// [`round_trip`](Self::round_trip) calls; everything request-scoped lives on
/// the [`FetchRequest`].
pub struct RangeTripper {
    chunks: usize,
    max_workers: Option<usize>,
    chunk_size: Option<u64>,
    client: Arc<dyn RequestClient>,
}

impl RangeTripper {
    /// Creates a tripper that divides downloads into `file_chunks` pieces
    /// (plus one more when the length does not divide evenly). Values below
    /// 1 are clamped to 1.
    #[must_use]
    pub fn new(file_chunks: usize) -> Self {
        Self {
            chunks: file_chunks.max(1),
            max_workers: None,
            chunk_size: None,
            client: Arc::new(reqwest::Client::new()),
        }
    }

    /// Overrides the client used for every sub-request — the probe included.
    /// Typically a [`RetryClient`](crate::RetryClient).
    pub fn set_client(&mut self, client: impl RequestClient + 'static) {
        self.client = Arc::new(client);
    }

    /// Caps the number of concurrently running workers. Zero is a no-op.
    pub fn set_max(&mut self, max: usize) {
        if max == 0 {
            return;
        }
        self.max_workers = Some(max);
    }

    /// Switches the planner to a fixed chunk width; the worker count is then
    /// derived from the content length. Values below 1 are clamped to 1.
    pub fn set_chunk_size(&mut self, chunk_bytes: u64) {
        self.chunk_size = Some(chunk_bytes.max(1));
    }

    /// Downloads the resource named by `request`.
    ///
    /// Probes the URL for range support, then either fans the body out over
    /// concurrent range sub-requests or streams it whole, writing into the
    /// requested output file or an in-memory buffer. The returned response
    /// carries the probe's status and headers and, in buffer mode, the
    /// assembled body.
    ///
    /// # Errors
    ///
    /// Returns an error when the probe fails unrecoverably
    /// ([`FetchError::HeadFailed`]), the declared `Content-Length` is not a
    /// number ([`FetchError::ContentLengthNumeric`]), any chunk fetch fails
    /// after the configured client's own retries, or the assembled size does
    /// not match the declared one ([`FetchError::ContentLengthMismatch`]).
    pub async fn round_trip(&self, request: FetchRequest) -> FetchResult<FetchResponse> {
        let started = Instant::now();
        let dlid = DOWNLOAD_SEQ.fetch_add(1, Ordering::Relaxed);

        let FetchRequest {
            url,
            headers,
            output,
            progress,
            cancel,
        } = request;
        let cancel = cancel.unwrap_or_default();
        let progress = ProgressSender::new(progress);

        // 1. Open the sink before any network traffic so a bad output path
        //    fails early.
        let sink = Arc::new(match &output {
            Some(path) => OutputSink::file(path).await?,
            None => OutputSink::buffer(),
        });

        let prober = Prober {
            client: self.client.as_ref(),
            url: &url,
            headers: &headers,
        };

        // 2. Probe. Some servers error on HEAD outright (noted against PHP
        //    downloaders that take query parameters); a head-fake may still
        //    settle the question.
        let (mut status, mut probe_headers) = match prober.head().await {
            Ok(response) => (response.status(), response.headers().clone()),
            Err(head_err) => match prober.try_head_fake(&sink, &progress).await {
                Ok(HeadFakeOutcome::WholeBody { status, headers }) => {
                    return Self::assemble(status, headers, &sink);
                }
                Ok(HeadFakeOutcome::Ranged { status, headers }) => (status, headers),
                Err(hf_err) => {
                    debug!(dlid, error = %hf_err, "head-fake did not recover, returning HEAD error");
                    return Err(head_err);
                }
            },
        };

        // 3. Forbidden might apply to the HEAD only: signed object stores
        //    commonly reject HEAD yet serve ranged GETs.
        if status == StatusCode::FORBIDDEN {
            match prober.try_head_fake(&sink, &progress).await {
                Ok(HeadFakeOutcome::WholeBody { status, headers }) => {
                    return Self::assemble(status, headers, &sink);
                }
                Ok(HeadFakeOutcome::Ranged {
                    status: hf_status,
                    headers,
                }) => {
                    status = hf_status;
                    probe_headers = headers;
                }
                Err(hf_err) => {
                    debug!(dlid, error = %hf_err, "head-fake did not recover from 403");
                    return Err(FetchError::HeadFailed {
                        status: status.as_u16(),
                    });
                }
            }
        } else if !(status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT) {
            return Err(FetchError::HeadFailed {
                status: status.as_u16(),
            });
        }

        // 4. Without a Content-Length there is nothing to partition; stream
        //    the body like a normal GET.
        let content_length = match probe_headers.get(CONTENT_LENGTH) {
            None => {
                progress.send(0).await;
                let written = self.whole_body(&url, &headers, &sink).await?;
                progress.send(written).await;
                debug!(dlid, written, "no content-length, full download complete");
                return Self::assemble(status, probe_headers, &sink);
            }
            Some(value) => parse_content_length(value)?,
        };

        // 5. The first progress event is the total length.
        progress.send(content_length).await;

        // 6. Ranged mode needs an explicit Accept-Ranges: bytes (possibly
        //    synthesized during head-fake recovery above).
        let ranged = probe_headers
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            == Some("bytes");

        if !ranged {
            debug!(dlid, "range download unsupported, beginning full download");
            let written = self.whole_body(&url, &headers, &sink).await?;
            progress.send(written).await;
            return Self::assemble(status, probe_headers, &sink);
        }

        // 7. Plan and dispatch. A degenerate plan (content shorter than one
        //    byte per worker) falls back to a single whole-body fetch rather
        //    than issuing zero-width ranges.
        let Some(plan) = plan::plan(content_length, self.chunks, self.chunk_size) else {
            debug!(dlid, content_length, "content too small to partition, fetching whole body");
            let written = self.whole_body(&url, &headers, &sink).await?;
            progress.send(written).await;
            return Self::assemble(status, probe_headers, &sink);
        };

        debug!(
            dlid,
            content_length,
            workers = plan.workers,
            chunk_size = plan.chunk_size,
            "ranges supported"
        );

        self.dispatch(dlid, plan, &url, &headers, &sink, &progress, &cancel)
            .await?;

        // 8. Verify assembly before handing the response back.
        let actual = sink.len().await?;
        if actual != content_length {
            return Err(FetchError::ContentLengthMismatch {
                actual,
                expected: content_length,
            });
        }

        debug!(
            dlid,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "assembled"
        );
        Self::assemble(status, probe_headers, &sink)
    }

    /// Fans the planned chunks out over semaphore-gated workers and waits for
    /// all of them, surfacing the first recorded failure.
    async fn dispatch(
        &self,
        dlid: u64,
        plan: ChunkPlan,
        url: &Url,
        headers: &HeaderMap,
        sink: &Arc<OutputSink>,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> FetchResult<()> {
        let capacity = match self.max_workers {
            Some(max) => max.max(self.chunks + 1),
            None => self.chunks + 1,
        };
        let semaphore = Arc::new(Semaphore::new(capacity));
        let errors = Arc::new(ErrorCell::default());
        // Worker failures cancel this child so in-flight siblings can
        // short-circuit; a caller-supplied token above it stays untouched.
        let cancel = cancel.child_token();
        let mut handles = Vec::with_capacity(plan.chunks.len());

        for chunk in plan.chunks {
            // A permit is held before the worker exists and released when it
            // finishes, so in-flight fetches never exceed the capacity.
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };

            if errors.is_set() || cancel.is_cancelled() {
                break;
            }

            debug!(
                dlid,
                index = chunk.index,
                start = chunk.range.start,
                end = chunk.range.end,
                "worker dispatched"
            );

            let client = Arc::clone(&self.client);
            let url = url.clone();
            let headers = headers.clone();
            let sink = Arc::clone(sink);
            let errors = Arc::clone(&errors);
            let progress = progress.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let started = Instant::now();
                match fetch_chunk(client.as_ref(), &url, &headers, &chunk, &sink, &cancel).await {
                    Ok(()) => {
                        debug!(
                            dlid,
                            index = chunk.index,
                            bytes = chunk.size(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "chunk complete"
                        );
                        progress.send(chunk.size()).await;
                    }
                    Err(err) => {
                        warn!(dlid, index = chunk.index, error = %err, "chunk failed");
                        errors.record(err);
                        cancel.cancel();
                    }
                }
                drop(permit);
            }));
        }

        for handle in handles {
            if let Err(join_err) = handle.await {
                errors.record(FetchError::Io(std::io::Error::other(join_err)));
            }
        }

        if let Some(err) = errors.take() {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        Ok(())
    }

    /// Streams the entire body into the sink with a single GET.
    async fn whole_body(
        &self,
        url: &Url,
        headers: &HeaderMap,
        sink: &OutputSink,
    ) -> FetchResult<u64> {
        let mut request = Request::new(Method::GET, url.clone());
        *request.headers_mut() = headers.clone();

        let response = self.client.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown error").into(),
            });
        }

        sink.write_stream(response).await
    }

    fn assemble(
        status: StatusCode,
        headers: HeaderMap,
        sink: &OutputSink,
    ) -> FetchResult<FetchResponse> {
        Ok(FetchResponse {
            status,
            headers,
            body: sink.take_body()?,
        })
    }
}

impl fmt::Debug for RangeTripper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeTripper")
            .field("chunks", &self.chunks)
            .field("max_workers", &self.max_workers)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

/// Fetches one chunk and writes it at its absolute offset.
async fn fetch_chunk(
    client: &dyn RequestClient,
    url: &Url,
    headers: &HeaderMap,
    chunk: &Chunk,
    sink: &OutputSink,
    cancel: &CancellationToken,
) -> FetchResult<()> {
    let mut request = Request::new(Method::GET, url.clone());
    *request.headers_mut() = headers.clone();

    let range = format!("bytes={}-{}", chunk.range.start, chunk.range.end - 1);
    request.headers_mut().insert(
        RANGE,
        HeaderValue::from_str(&range).map_err(std::io::Error::other)?,
    );

    let response = tokio::select! {
        result = client.execute(request) => result?,
        () = cancel.cancelled() => return Err(FetchError::Cancelled),
    };

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Http {
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or("Unknown error").into(),
        });
    }

    // Read the chunk fully, then write it in one shot so the sink sees a
    // single contiguous write per region.
    let body = tokio::select! {
        result = response.bytes() => result?,
        () = cancel.cancelled() => return Err(FetchError::Cancelled),
    };

    sink.write_at(chunk.range.start, &body).await
}

/// Parses a `Content-Length` header value that is known to be present.
fn parse_content_length(value: &HeaderValue) -> FetchResult<u64> {
    let text = value
        .to_str()
        .map_err(|_| FetchError::ContentLengthNumeric {
            value: format!("{value:?}"),
        })?;

    text.trim()
        .parse()
        .map_err(|_| FetchError::ContentLengthNumeric { value: text.into() })
}
