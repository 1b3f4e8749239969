//! Range-support probing: HEAD plus the head-fake fallback.

use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE,
};
use reqwest::{Method, Request, Response, StatusCode, Url};
use tracing::debug;

use crate::client::RequestClient;
use crate::error::{FetchError, FetchResult};
use crate::progress::ProgressSender;
use crate::sink::OutputSink;

/// Issues the preparatory requests that decide between ranged and whole-body
/// download modes. All traffic goes through the configured client, so a
/// retrying client wraps the probe too.
pub(crate) struct Prober<'a> {
    pub client: &'a dyn RequestClient,
    pub url: &'a Url,
    pub headers: &'a HeaderMap,
}

/// What a successful head-fake recovery settled on.
pub(crate) enum HeadFakeOutcome {
    /// The server ignored the range and sent the whole body, which has
    /// already been copied into the sink. The download is complete.
    WholeBody {
        status: StatusCode,
        headers: HeaderMap,
    },
    /// The server honored the range. The returned headers carry a
    /// `Content-Length` synthesized from `Content-Range` and a forced
    /// `Accept-Ranges: bytes`, so the caller can proceed exactly as if the
    /// HEAD had succeeded.
    Ranged {
        status: StatusCode,
        headers: HeaderMap,
    },
}

impl Prober<'_> {
    /// Builds a sub-request carrying the caller's headers.
    fn request(&self, method: Method) -> Request {
        let mut request = Request::new(method, self.url.clone());
        *request.headers_mut() = self.headers.clone();
        request
    }

    /// A plain HEAD for the URL.
    pub async fn head(&self) -> FetchResult<Response> {
        self.client.execute(self.request(Method::HEAD)).await
    }

    /// A GET with a tiny range, used to sniff range support when HEAD is
    /// unavailable or forbidden.
    pub async fn head_fake(&self) -> FetchResult<Response> {
        let mut request = self.request(Method::GET);
        request
            .headers_mut()
            .insert(RANGE, HeaderValue::from_static("bytes=0-10"));

        let response = self.client.execute(request).await?;
        debug!(
            status = response.status().as_u16(),
            content_range = ?response.headers().get(CONTENT_RANGE),
            content_length = ?response.headers().get(CONTENT_LENGTH),
            "head-fake answered"
        );
        Ok(response)
    }

    /// Attempts head-fake recovery after a failed or forbidden HEAD.
    ///
    /// A 200 answer means the server gave us the whole file; it is streamed
    /// into `sink` right here and the download is over. A 206 answer means
    /// ranges work: the total size is lifted from the `Content-Range` header
    /// into a synthesized `Content-Length`. Anything else — including a 206
    /// whose total is `*` or otherwise unparseable — is reported as
    /// [`FetchError::HeadFakeInconclusive`], which tells the caller to fall
    /// back to whatever error preceded this attempt. Transported errors pass
    /// through unchanged.
    pub async fn try_head_fake(
        &self,
        sink: &OutputSink,
        progress: &ProgressSender,
    ) -> FetchResult<HeadFakeOutcome> {
        let response = self.head_fake().await?;

        match response.status() {
            StatusCode::OK => {
                let status = response.status();
                let headers = response.headers().clone();

                // Length unknown until the copy finishes, so the initial
                // progress event is 0, then one delta for the whole body.
                progress.send(0).await;
                let written = sink.write_stream(response).await?;
                progress.send(written).await;

                Ok(HeadFakeOutcome::WholeBody { status, headers })
            }
            StatusCode::PARTIAL_CONTENT => {
                let Some(total) = content_range_total(response.headers()) else {
                    return Err(FetchError::HeadFakeInconclusive);
                };

                let status = response.status();
                let mut headers = response.headers().clone();
                headers.insert(CONTENT_LENGTH, HeaderValue::from(total));
                headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

                Ok(HeadFakeOutcome::Ranged { status, headers })
            }
            _ => Err(FetchError::HeadFakeInconclusive),
        }
    }
}

/// Extracts the total size from a `Content-Range: bytes {first}-{last}/{total}`
/// header. A total of `*` (or any other unparseable value) yields `None`:
/// without a concrete size, range mode is not available.
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)?
        .to_str()
        .ok()?
        .split('/')
        .nth(1)?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_content_range(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_RANGE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn content_range_total_parses_byte_totals() {
        let headers = headers_with_content_range("bytes 0-10/159");
        assert_eq!(content_range_total(&headers), Some(159));
    }

    #[test]
    fn content_range_total_rejects_wildcard() {
        let headers = headers_with_content_range("bytes 0-10/*");
        assert_eq!(content_range_total(&headers), None);
    }

    #[test]
    fn content_range_total_rejects_garbage() {
        assert_eq!(
            content_range_total(&headers_with_content_range("bytes 0-10")),
            None
        );
        assert_eq!(
            content_range_total(&headers_with_content_range("bytes 0-10/notanumber")),
            None
        );
        assert_eq!(content_range_total(&HeaderMap::new()), None);
    }
}
