//! HTTP transport seam
//!
//! The dispatcher talks to the network only through [`Transport`]: one call
//! to prepare a request, then one call per send attempt. Failures must come
//! back classified, so connect and read timeouts can be told apart from
//! everything else.

use super::request::{Body, OutboundRequest, SendOptions, DEFAULT_TIMEOUT};
use super::response::{Response, ResponseBody};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::redirect::Policy;
use reqwest::{Client, Request};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Capability the dispatcher needs from an HTTP client
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport-specific prepared request, reused across retries
    type Prepared: Send + Sync;

    /// Prepare a request from method, URL, headers and body
    fn prepare(&self, request: &OutboundRequest) -> Result<Self::Prepared>;

    /// Send a prepared request once
    async fn send(&self, prepared: &Self::Prepared, options: &SendOptions) -> Result<Response>;
}

/// Default redirect hop limit
const MAX_REDIRECTS: usize = 10;

/// Builder for [`ReqwestTransport`]
#[derive(Debug, Clone)]
pub struct ReqwestTransportBuilder {
    connect_timeout: Option<Duration>,
    max_redirects: usize,
    pool_idle_timeout: Option<Duration>,
}

impl Default for ReqwestTransportBuilder {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            max_redirects: MAX_REDIRECTS,
            pool_idle_timeout: Some(Duration::from_secs(90)),
        }
    }
}

impl ReqwestTransportBuilder {
    /// Fixed connect timeout. Without one, each send gets its own request
    /// timeout as the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Maximum redirect hops when redirects are followed
    #[must_use]
    pub fn max_redirects(mut self, hops: usize) -> Self {
        self.max_redirects = hops;
        self
    }

    /// Idle pooled connections are closed after this long
    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    /// Build the transport
    pub fn build(self) -> Result<ReqwestTransport> {
        let base = self.client(self.connect_timeout.unwrap_or(DEFAULT_TIMEOUT), true)?;
        Ok(ReqwestTransport {
            settings: self,
            base,
            clients: Mutex::new(HashMap::new()),
        })
    }

    fn client(&self, connect_timeout: Duration, follow_redirects: bool) -> Result<Client> {
        let redirect = if follow_redirects {
            Policy::limited(self.max_redirects)
        } else {
            Policy::none()
        };

        Ok(Client::builder()
            .pool_idle_timeout(self.pool_idle_timeout)
            .connect_timeout(connect_timeout)
            .redirect(redirect)
            .build()?)
    }
}

/// [`Transport`] backed by reqwest.
///
/// Redirect policy and connect timeout are client-level settings in reqwest,
/// so one client is kept per (connect timeout, redirect policy) pair in use.
/// A send gets the connect timeout to connect and its request timeout on top
/// of that to complete, so a stalled connect always surfaces as a connect
/// timeout.
#[derive(Debug)]
pub struct ReqwestTransport {
    settings: ReqwestTransportBuilder,
    base: Client,
    clients: Mutex<HashMap<(Duration, bool), Client>>,
}

impl ReqwestTransport {
    /// Create a transport with default settings
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a transport builder
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::default()
    }

    /// Client used to prepare requests
    pub fn inner(&self) -> &Client {
        &self.base
    }

    /// Connect timeout applied to a send with these options
    pub fn connect_timeout_for(&self, options: &SendOptions) -> Duration {
        self.settings.connect_timeout.unwrap_or(options.timeout)
    }

    fn client_for(&self, connect_timeout: Duration, follow_redirects: bool) -> Result<Client> {
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| Error::Other("Transport client cache poisoned".to_string()))?;

        if let Some(client) = clients.get(&(connect_timeout, follow_redirects)) {
            return Ok(client.clone());
        }

        let client = self.settings.client(connect_timeout, follow_redirects)?;
        clients.insert((connect_timeout, follow_redirects), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    type Prepared = Request;

    fn prepare(&self, request: &OutboundRequest) -> Result<Request> {
        let mut builder = self
            .base
            .request(request.method.into(), request.url.clone())
            .headers(request.headers.clone());

        builder = match &request.body {
            Some(Body::Bytes(bytes)) => builder.body(bytes.clone()),
            Some(Body::Text(text)) => builder.body(text.clone()),
            Some(Body::Json(value)) => builder.json(value),
            Some(Body::Form(fields)) => builder.form(fields),
            None => builder,
        };

        Ok(builder.build()?)
    }

    async fn send(&self, prepared: &Request, options: &SendOptions) -> Result<Response> {
        let mut request = prepared
            .try_clone()
            .ok_or_else(|| Error::Other("Request body cannot be replayed".to_string()))?;
        let connect_timeout = self.connect_timeout_for(options);
        *request.timeout_mut() = Some(connect_timeout.saturating_add(options.timeout));

        let client = self.client_for(connect_timeout, options.allow_redirects)?;

        let response = client.execute(request).await.map_err(classify)?;
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();

        let body = if options.stream {
            ResponseBody::Streaming(response.bytes_stream().map_err(classify).boxed())
        } else {
            ResponseBody::Buffered(response.bytes().await.map_err(classify)?)
        };

        Ok(Response::new(status, headers, url, body))
    }
}

/// Sort reqwest failures into connect timeout, read timeout, or fatal
pub fn classify(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        if error.is_connect() {
            Error::connect_timeout(error.to_string())
        } else {
            Error::read_timeout(error.to_string())
        }
    } else {
        Error::Http(error)
    }
}
