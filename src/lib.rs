// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # Pacer
//!
//! A rate-limited HTTP request dispatcher.
//! Every outbound request waits for a permit keyed by the caller identity,
//! and connect/read timeouts are retried with exponential backoff.
//!
//! ## Features
//!
//! - **Composite Rate Rules**: e.g. 1/second AND 56/minute, all enforced together
//! - **Per-Caller Buckets**: independent budgets per caller identity
//! - **Shared State**: optional file-backed limiter state shared across processes
//! - **Timeout Retries**: up to 10 retries, 2s, 4s, 8s, ... between them
//! - **Strict Headers**: default User-Agent only when the caller sends none
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pacer::http::{Dispatcher, ReqwestTransport, RequestConfig};
//! use pacer::types::Method;
//! use pacer::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let dispatcher = Dispatcher::new(ReqwestTransport::new()?, "my-crawler")?;
//!
//!     let response = dispatcher
//!         .send(
//!             Method::GET,
//!             "https://httpbin.org/get",
//!             RequestConfig::new().header("Accept", "application/json"),
//!         )
//!         .await?;
//!     println!("{}", response.status());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! caller ──▶ Dispatcher::send
//!              │ build OutboundRequest (defaults or caller headers)
//!              ▼
//!           Acquiring ──▶ Limiter::acquire(identity)   (may block / deny)
//!              ▼
//!           Sending ───▶ Transport::send               (reqwest)
//!              │ timeout
//!              ▼
//!           Backoff ───▶ sleep 2 * 2^(n-1) s ──▶ Acquiring
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// Common types and type aliases
pub mod types;

/// Configuration loaded from YAML
pub mod config;

/// Keyed rate limiting
pub mod limiter;

/// Rate-limited dispatcher, transport and retry policy
pub mod http;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};

pub use config::DispatcherConfig;
pub use http::{Dispatcher, ReqwestTransport, RequestConfig, Response};
pub use limiter::{AcquirePolicy, Limiter, RateLimiter, RateRule};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
