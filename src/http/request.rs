//! Outbound request types
//!
//! An [`OutboundRequest`] is built fresh for every `send` call from the
//! dispatcher defaults and the per-call [`RequestConfig`].

use crate::error::{Error, Result};
use crate::types::{JsonValue, Method};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use std::time::Duration;
use url::Url;

/// User-Agent sent when the caller supplies no headers
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:102.0) Gecko/20100101 Firefox/102.0";

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Request body
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Raw bytes
    Bytes(Bytes),
    /// UTF-8 text
    Text(String),
    /// JSON document
    Json(JsonValue),
    /// `application/x-www-form-urlencoded` pairs
    Form(Vec<(String, String)>),
}

/// Transport options applied to a single send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Time allowed to connect, and again to complete the exchange
    pub timeout: Duration,
    /// Hand the body back as a stream instead of buffering it
    pub stream: bool,
    /// Follow redirects
    pub allow_redirects: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            stream: false,
            allow_redirects: true,
        }
    }
}

/// A fully built request, ready to be prepared by a transport
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Body>,
}

impl OutboundRequest {
    /// Target for log lines: `scheme://host[:port]/path (/?...)`.
    ///
    /// Query strings and credentials are left out.
    pub fn display_target(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!(
                "{}://{}:{}{} (/?...)",
                self.url.scheme(),
                host,
                port,
                self.url.path()
            ),
            None => format!("{}://{}{} (/?...)", self.url.scheme(), host, self.url.path()),
        }
    }
}

/// Per-call request settings
///
/// Headers, when given, replace the dispatcher's default headers entirely.
/// Option overrides left as `None` fall back to the dispatcher defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    /// Full header override
    pub headers: Option<Vec<(String, String)>>,
    /// Request body
    pub body: Option<Body>,
    /// Override timeout for this request
    pub timeout: Option<Duration>,
    /// Override streaming for this request
    pub stream: Option<bool>,
    /// Override redirect following for this request
    pub allow_redirects: Option<bool>,
}

impl RequestConfig {
    /// Create a new request config
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header; the first call switches off the default headers
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Vec::new)
            .push((key.into(), value.into()));
        self
    }

    /// Replace all headers
    #[must_use]
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers = Some(
            headers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Set a raw body
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(Body::Bytes(body.into()));
        self
    }

    /// Set a text body
    #[must_use]
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(Body::Text(body.into()));
        self
    }

    /// Set JSON body
    #[must_use]
    pub fn json(mut self, body: JsonValue) -> Self {
        self.body = Some(Body::Json(body));
        self
    }

    /// Set form body
    #[must_use]
    pub fn form<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.body = Some(Body::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ));
        self
    }

    /// Set timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set streaming
    #[must_use]
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Set redirect following
    #[must_use]
    pub fn allow_redirects(mut self, allow: bool) -> Self {
        self.allow_redirects = Some(allow);
        self
    }

    /// Merge the overrides over `defaults`
    pub fn options(&self, defaults: &SendOptions) -> SendOptions {
        SendOptions {
            timeout: self.timeout.unwrap_or(defaults.timeout),
            stream: self.stream.unwrap_or(defaults.stream),
            allow_redirects: self.allow_redirects.unwrap_or(defaults.allow_redirects),
        }
    }
}

/// The default header set: a single User-Agent entry
pub fn default_headers(user_agent: &str) -> Result<HeaderMap> {
    let value = HeaderValue::from_str(user_agent)
        .map_err(|e| Error::config(format!("Invalid user agent '{user_agent}': {e}")))?;
    let mut headers = HeaderMap::with_capacity(1);
    headers.insert(USER_AGENT, value);
    Ok(headers)
}

/// Convert caller-supplied pairs into a header map
pub fn header_map(pairs: &[(String, String)]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::invalid_header(name, e.to_string()))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|e| Error::invalid_header(name, e.to_string()))?;
        headers.append(header_name, header_value);
    }
    Ok(headers)
}
