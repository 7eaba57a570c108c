//! Dispatch observer hooks
//!
//! Observers see what the dispatcher does but cannot change it. Hooks are
//! synchronous and should return quickly.

use super::request::OutboundRequest;
use super::response::Response;
use crate::error::Error;
use std::time::Duration;

/// Side channel for dispatch events
pub trait DispatchObserver: Send + Sync {
    /// A send attempt is about to start (`attempt` is 1-based)
    fn on_request_start(&self, _request: &OutboundRequest, _attempt: u32) {}

    /// A transient failure will be retried after `delay`
    fn on_retry(&self, _retry: u32, _delay: Duration, _error: &Error) {}

    /// A response arrived after `attempts` sends
    fn on_response(&self, _response: &Response, _attempts: u32) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl DispatchObserver for NoopObserver {}
