//! Rate-limited request dispatcher
//!
//! Every send goes through the same steps:
//! - build the outbound request (default headers only when none are given)
//! - acquire a permit from the limiter for the caller identity
//! - send through the transport
//! - on a connect or read timeout, back off and start over from acquisition
//!
//! Retries take a fresh permit each time, so a flaky endpoint is never hit
//! faster than the configured rules allow.

use super::observer::{DispatchObserver, NoopObserver};
use super::request::{
    default_headers, header_map, OutboundRequest, RequestConfig, SendOptions, DEFAULT_USER_AGENT,
};
use super::response::Response;
use super::retry::{Effect, RetryEvent, RetryPolicy, RetryState};
use super::transport::{ReqwestTransport, Transport};
use crate::config::DispatcherConfig;
use crate::error::{Error, Result};
use crate::limiter::{describe_rules, Limiter, RateLimiter};
use crate::types::Method;
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Builder for [`Dispatcher`]
pub struct DispatcherBuilder<T: Transport> {
    transport: T,
    identity: String,
    limiter: Option<Arc<dyn Limiter>>,
    defaults: SendOptions,
    retry: RetryPolicy,
    user_agent: String,
    observer: Arc<dyn DispatchObserver>,
}

impl<T: Transport> DispatcherBuilder<T> {
    fn new(transport: T, identity: String) -> Self {
        Self {
            transport,
            identity,
            limiter: None,
            defaults: SendOptions::default(),
            retry: RetryPolicy::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Use this limiter instead of the default policy
    #[must_use]
    pub fn limiter(self, limiter: impl Limiter + 'static) -> Self {
        self.shared_limiter(Arc::new(limiter))
    }

    /// Use a limiter shared with other dispatchers
    #[must_use]
    pub fn shared_limiter(mut self, limiter: Arc<dyn Limiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Default request timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.defaults.timeout = timeout;
        self
    }

    /// Default streaming behavior
    #[must_use]
    pub fn stream(mut self, stream: bool) -> Self {
        self.defaults.stream = stream;
        self
    }

    /// Default redirect behavior
    #[must_use]
    pub fn allow_redirects(mut self, allow: bool) -> Self {
        self.defaults.allow_redirects = allow;
        self
    }

    /// Timeout retry policy
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// User-Agent for the default header set
    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Observer for dispatch events
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<Dispatcher<T>> {
        if self.identity.trim().is_empty() {
            return Err(Error::config("Caller identity cannot be empty"));
        }
        if self.defaults.timeout.is_zero() {
            return Err(Error::config("Request timeout must be greater than zero"));
        }

        let default_headers = default_headers(&self.user_agent)?;
        let limiter = self
            .limiter
            .unwrap_or_else(|| Arc::new(RateLimiter::default_policy()));

        Ok(Dispatcher {
            transport: self.transport,
            identity: self.identity,
            limiter,
            defaults: self.defaults,
            retry: self.retry,
            default_headers,
            observer: self.observer,
        })
    }
}

/// Sends requests for one caller identity under a rate limit, retrying
/// connect and read timeouts with exponential backoff.
///
/// Holds no mutable state; share it freely across tasks.
pub struct Dispatcher<T: Transport = ReqwestTransport> {
    transport: T,
    identity: String,
    limiter: Arc<dyn Limiter>,
    defaults: SendOptions,
    retry: RetryPolicy,
    default_headers: HeaderMap,
    observer: Arc<dyn DispatchObserver>,
}

impl Dispatcher<ReqwestTransport> {
    /// Build a reqwest-backed dispatcher from configuration
    pub fn from_config(config: &DispatcherConfig) -> Result<Self> {
        config.validate()?;

        let mut transport = ReqwestTransport::builder();
        if let Some(timeout) = config.connect_timeout()? {
            transport = transport.connect_timeout(timeout);
        }
        Self::from_config_with_transport(transport.build()?, config)
    }
}

impl<T: Transport> Dispatcher<T> {
    /// Start building a dispatcher
    pub fn builder(transport: T, identity: impl Into<String>) -> DispatcherBuilder<T> {
        DispatcherBuilder::new(transport, identity.into())
    }

    /// Dispatcher with default options and the default limiter policy
    pub fn new(transport: T, identity: impl Into<String>) -> Result<Self> {
        Self::builder(transport, identity).build()
    }

    /// Build a dispatcher from configuration around any transport
    pub fn from_config_with_transport(transport: T, config: &DispatcherConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = Self::builder(transport, config.identity.clone())
            .limiter(RateLimiter::from_config(&config.limiter)?)
            .timeout(config.timeout()?)
            .stream(config.stream)
            .allow_redirects(config.allow_redirects)
            .retry_policy(RetryPolicy::from_config(&config.retry)?);

        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }

        builder.build()
    }

    /// The transport this dispatcher sends through
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Caller identity used as the rate-limit key
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Default send options
    pub fn defaults(&self) -> &SendOptions {
        &self.defaults
    }

    /// The limiter consulted before each attempt
    pub fn limiter(&self) -> &Arc<dyn Limiter> {
        &self.limiter
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Make a GET request with default settings
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.send(Method::GET, url, RequestConfig::default()).await
    }

    /// Build the outbound request for a call.
    ///
    /// Caller headers, when present, are used as-is; otherwise the default
    /// header set applies. The two are never merged.
    pub fn build_request(
        &self,
        method: Method,
        url: &str,
        config: &RequestConfig,
    ) -> Result<OutboundRequest> {
        let url = Url::parse(url)?;
        let headers = match &config.headers {
            Some(pairs) => header_map(pairs)?,
            None => self.default_headers.clone(),
        };

        Ok(OutboundRequest {
            method,
            url,
            headers,
            body: config.body.clone(),
        })
    }

    /// Send a request, waiting for rate-limit capacity and retrying timeouts
    pub async fn send(&self, method: Method, url: &str, config: RequestConfig) -> Result<Response> {
        let request = self.build_request(method, url, &config)?;
        let options = config.options(&self.defaults);
        let prepared = self.transport.prepare(&request)?;

        self.dispatch(&request, &prepared, &options).await
    }

    async fn dispatch(
        &self,
        request: &OutboundRequest,
        prepared: &T::Prepared,
        options: &SendOptions,
    ) -> Result<Response> {
        let (mut state, mut effect) = self.retry.start();
        let mut response = None;
        let mut last_error = None;

        loop {
            let event = match effect {
                Effect::Acquire => match self.limiter.acquire(&self.identity).await {
                    Ok(()) => RetryEvent::PermitGranted,
                    Err(e) => {
                        warn!("Rate limiter refused '{}': {}", self.identity, e);
                        last_error = Some(e);
                        RetryEvent::PermitDenied
                    }
                },
                Effect::Send => {
                    let attempt = state.retries() + 1;
                    self.log_request(request, attempt);
                    self.observer.on_request_start(request, attempt);

                    match self.transport.send(prepared, options).await {
                        Ok(resp) => {
                            debug!(
                                "{} {} -> {}",
                                request.method,
                                request.display_target(),
                                resp.status().as_u16()
                            );
                            self.observer.on_response(&resp, attempt);
                            response = Some(resp);
                            RetryEvent::Responded
                        }
                        Err(e) if e.is_transient() => {
                            last_error = Some(e);
                            RetryEvent::TransientFailure
                        }
                        Err(e) => {
                            last_error = Some(e);
                            RetryEvent::FatalFailure
                        }
                    }
                }
                Effect::Sleep(delay) => {
                    if let Some(error) = &last_error {
                        info!("{}: waiting {:?} to retry", error, delay);
                        self.observer.on_retry(state.retries(), delay, error);
                    }
                    tokio::time::sleep(delay).await;
                    RetryEvent::BackoffElapsed
                }
                Effect::Deliver => {
                    return response
                        .ok_or_else(|| Error::Other("Dispatch finished without a response".into()));
                }
                Effect::Fail => {
                    let error = last_error
                        .unwrap_or_else(|| Error::Other("Dispatch failed without an error".into()));
                    return Err(match state {
                        RetryState::FatalFailure {
                            retries,
                            exhausted: true,
                        } => {
                            warn!(
                                "Giving up on {} after {} attempts",
                                request.display_target(),
                                retries + 1
                            );
                            error.into_exhausted(retries + 1)
                        }
                        _ => error,
                    });
                }
            };

            (state, effect) = self.retry.transition(state, event);
        }
    }

    fn log_request(&self, request: &OutboundRequest, attempt: u32) {
        debug!(
            "Sending request now {} (attempt {})",
            chrono::Local::now().to_rfc3339(),
            attempt
        );
        debug!("Url: {}", request.display_target());
        debug!("Limiters: {}", describe_rules(self.limiter.rules()));
    }
}

impl<T: Transport> std::fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("identity", &self.identity)
            .field("defaults", &self.defaults)
            .field("retry", &self.retry)
            .field("rules", &describe_rules(self.limiter.rules()))
            .finish_non_exhaustive()
    }
}
