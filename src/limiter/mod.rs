//! Rate limiting module
//!
//! Keyed, composite-rule rate limiting for outbound requests.
//!
//! # Features
//!
//! - **Composite Rules**: every rule (e.g. 1/second and 56/minute) must have capacity
//! - **Caller Buckets**: each caller identity has an independent budget
//! - **Policies**: block until admitted, or wait up to a bound and then deny
//! - **Backends**: governor token buckets in memory, or a file shared across
//!   processes under a file lock

mod buckets;
mod rate_limit;
mod rules;
mod store;
mod window;

pub use buckets::{KeyedBuckets, TokioClock};
pub use rate_limit::{default_rules, AcquirePolicy, Clock, Limiter, RateLimiter, SystemClock};
pub use rules::{describe_rules, Per, RateRule};
pub use store::{BucketStore, FileStore};
pub use window::{Admission, GrantLog};
