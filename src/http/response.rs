//! Response handed back to callers

use crate::error::Result;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

/// Response body, buffered or streamed per the `stream` send option
pub enum ResponseBody {
    Buffered(Bytes),
    Streaming(BoxStream<'static, Result<Bytes>>),
}

/// An HTTP response of any status.
///
/// Status codes are not interpreted by the dispatcher; a 4xx or 5xx comes
/// back here like any other response.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    body: ResponseBody,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, url: Url, body: ResponseBody) -> Self {
        Self {
            status,
            headers,
            url,
            body,
        }
    }

    /// Buffered response, mostly useful for custom transports
    pub fn buffered(status: StatusCode, url: Url, body: impl Into<Bytes>) -> Self {
        Self::new(
            status,
            HeaderMap::new(),
            url,
            ResponseBody::Buffered(body.into()),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Final URL, after any redirects
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, ResponseBody::Streaming(_))
    }

    /// Collect the full body
    pub async fn bytes(self) -> Result<Bytes> {
        match self.body {
            ResponseBody::Buffered(bytes) => Ok(bytes),
            ResponseBody::Streaming(mut chunks) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = chunks.try_next().await? {
                    buf.extend_from_slice(&chunk);
                }
                Ok(buf.freeze())
            }
        }
    }

    /// Collect the body as text, replacing invalid UTF-8
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Collect and parse the body as JSON
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Body as a chunk stream; a buffered body yields one chunk
    pub fn bytes_stream(self) -> BoxStream<'static, Result<Bytes>> {
        match self.body {
            ResponseBody::Buffered(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            ResponseBody::Streaming(chunks) => chunks,
        }
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("streaming", &self.is_streaming())
            .finish_non_exhaustive()
    }
}
