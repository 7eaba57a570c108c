//! HTTP dispatch module
//!
//! Provides the rate-limited dispatcher and the transport it sends through.
//!
//! # Features
//!
//! - **Rate Limiting**: a permit is taken for the caller identity before every attempt
//! - **Timeout Retries**: connect and read timeouts retried with exponential backoff
//! - **Default Headers**: a single User-Agent, replaced wholesale by caller headers
//! - **Pluggable Transport**: reqwest by default, any [`Transport`] in tests

mod dispatcher;
mod observer;
mod request;
mod response;
mod retry;
mod transport;

pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use observer::{DispatchObserver, NoopObserver};
pub use request::{
    default_headers, header_map, Body, OutboundRequest, RequestConfig, SendOptions,
    DEFAULT_TIMEOUT, DEFAULT_USER_AGENT,
};
pub use response::{Response, ResponseBody};
pub use retry::{Effect, RetryEvent, RetryPolicy, RetryState};
pub use transport::{classify, ReqwestTransport, ReqwestTransportBuilder, Transport};
