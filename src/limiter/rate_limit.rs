//! Rate limiter
//!
//! Combines a rule set, an acquisition policy, and a backend into the
//! [`Limiter`] capability consumed by the dispatcher. The in-process backend
//! is a set of governor token buckets; a [`BucketStore`] backend shares
//! admission state with other processes.

use super::buckets::KeyedBuckets;
use super::rules::{describe_rules, RateRule};
use super::store::{BucketStore, FileStore};
use super::window::Admission;
use crate::config::{seconds, LimiterConfig, PolicyKind, StoreConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Capability to admit requests for a caller identity
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Wait for (or be denied) a permit for `identity`
    async fn acquire(&self, identity: &str) -> Result<()>;

    /// Active rules, for diagnostics
    fn rules(&self) -> &[RateRule];
}

/// What to do when no capacity is available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquirePolicy {
    /// Suspend until a permit is available; never denies
    #[default]
    Block,
    /// Suspend for at most this long in total, then deny
    MaxDelay(Duration),
}

/// Source of the current time in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock; safe to share with other processes through a [`FileStore`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[derive(Clone)]
enum Backend {
    /// Governor buckets private to this process
    Local(Arc<KeyedBuckets>),
    /// Sliding-window log in a shared store
    Shared {
        store: Arc<dyn BucketStore>,
        clock: Arc<dyn Clock>,
    },
}

/// Rate limiter keyed by caller identity
#[derive(Clone)]
pub struct RateLimiter {
    rules: Vec<RateRule>,
    policy: AcquirePolicy,
    backend: Backend,
}

impl RateLimiter {
    /// Create a limiter with in-process token buckets
    pub fn new(rules: &[RateRule], policy: AcquirePolicy) -> Result<Self> {
        let rules = RateRule::validate_set(rules)?;
        let buckets = KeyedBuckets::new(&rules)?;
        Ok(Self {
            rules,
            policy,
            backend: Backend::Local(Arc::new(buckets)),
        })
    }

    /// Create a limiter whose admission state lives in `store`
    pub fn with_store(
        rules: &[RateRule],
        policy: AcquirePolicy,
        store: Arc<dyn BucketStore>,
    ) -> Result<Self> {
        Ok(Self {
            rules: RateRule::validate_set(rules)?,
            policy,
            backend: Backend::Shared {
                store,
                clock: Arc::new(SystemClock),
            },
        })
    }

    /// Blocking limiter with process-local state
    pub fn in_memory(rules: &[RateRule]) -> Result<Self> {
        Self::new(rules, AcquirePolicy::Block)
    }

    /// The default policy: 1 request per second and 56 per minute, blocking,
    /// in memory. Each call creates an independent limiter.
    pub fn default_policy() -> Self {
        let rules = default_rules();
        let buckets = KeyedBuckets::new(&rules)
            .unwrap_or_else(|e| unreachable!("default rules are valid: {e}"));
        Self {
            rules,
            policy: AcquirePolicy::Block,
            backend: Backend::Local(Arc::new(buckets)),
        }
    }

    /// Build a limiter from its configuration section
    pub fn from_config(config: &LimiterConfig) -> Result<Self> {
        config.validate()?;

        let rules: Vec<RateRule> = config
            .rules
            .iter()
            .map(|r| RateRule::new(r.limit, r.per.duration()))
            .collect();

        let policy = match config.policy {
            PolicyKind::Block => AcquirePolicy::Block,
            PolicyKind::MaxDelay => {
                AcquirePolicy::MaxDelay(seconds("limiter.max_delay_secs", config.max_delay_secs)?)
            }
        };

        match &config.store {
            StoreConfig::Memory => Self::new(&rules, policy),
            StoreConfig::File { path } => {
                Self::with_store(&rules, policy, Arc::new(FileStore::new(path)?))
            }
        }
    }

    /// Replace the clock used with a shared store
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        if let Backend::Shared { clock: current, .. } = &mut self.backend {
            *current = clock;
        }
        self
    }

    /// Acquisition policy
    pub fn policy(&self) -> AcquirePolicy {
        self.policy
    }

    /// Backend name
    pub fn store_kind(&self) -> &'static str {
        match &self.backend {
            Backend::Local(_) => "memory",
            Backend::Shared { store, .. } => store.kind(),
        }
    }

    /// Drop in-process buckets of identities that are idle again
    pub fn shrink(&self) {
        if let Backend::Local(buckets) = &self.backend {
            buckets.shrink();
        }
    }

    /// Account for a wait: deny under [`AcquirePolicy::MaxDelay`] when the
    /// total would exceed the bound, otherwise sleep it off
    async fn pause(&self, identity: &str, wait: Duration, waited: &mut Duration) -> Result<()> {
        if let AcquirePolicy::MaxDelay(max_delay) = self.policy {
            if *waited + wait > max_delay {
                return Err(Error::capacity_exhausted(
                    identity,
                    wait.as_millis() as u64,
                ));
            }
        }

        debug!(
            "Rate limit reached for '{}' ({}), waiting {:?}",
            identity,
            describe_rules(&self.rules),
            wait
        );
        tokio::time::sleep(wait).await;
        *waited += wait;
        Ok(())
    }
}

/// {1/second, 56/minute}
pub fn default_rules() -> Vec<RateRule> {
    vec![RateRule::per_second(1), RateRule::per_minute(56)]
}

#[async_trait]
impl Limiter for RateLimiter {
    async fn acquire(&self, identity: &str) -> Result<()> {
        let mut waited = Duration::ZERO;

        match &self.backend {
            // One cell from every bucket, widest window first, so the
            // narrowest rule is taken last, right before the send
            Backend::Local(buckets) => {
                for index in 0..buckets.len() {
                    while let Admission::Wait(wait) = buckets.check(index, identity) {
                        self.pause(identity, wait, &mut waited).await?;
                    }
                }
                Ok(())
            }
            Backend::Shared { store, clock } => loop {
                let now = clock.now_ms();
                match store.try_admit(identity, &self.rules, now).await? {
                    Admission::Granted => return Ok(()),
                    Admission::Wait(wait) => self.pause(identity, wait, &mut waited).await?,
                }
            },
        }
    }

    fn rules(&self) -> &[RateRule] {
        &self.rules
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::default_policy()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("rules", &describe_rules(&self.rules))
            .field("policy", &self.policy)
            .field("store", &self.store_kind())
            .finish_non_exhaustive()
    }
}
