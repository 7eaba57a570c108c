//! In-process keyed buckets
//!
//! Uses the governor crate (GCRA) for per-identity token buckets, one keyed
//! limiter per rule.

use super::rules::RateRule;
use super::window::Admission;
use crate::error::{Error, Result};
use governor::clock::Clock as GovernorClock;
use governor::middleware::NoOpMiddleware;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter as Governor};
use std::num::NonZeroU32;
use std::time::Instant;

/// Governor clock that reads tokio time, so paused runtimes drive the buckets
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl GovernorClock for TokioClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

type KeyedGovernor =
    Governor<String, DefaultKeyedStateStore<String>, TokioClock, NoOpMiddleware<Instant>>;

/// One keyed token bucket for a single rule
struct RuleBucket {
    rule: RateRule,
    limiter: KeyedGovernor,
}

/// Per-identity token buckets for a rule set
pub struct KeyedBuckets {
    /// Widest window first
    buckets: Vec<RuleBucket>,
    clock: TokioClock,
}

impl KeyedBuckets {
    /// Build one bucket per rule. A rule of `limit` per `window` refills one
    /// cell every `window / limit` and bursts up to `limit`.
    pub fn new(rules: &[RateRule]) -> Result<Self> {
        let clock = TokioClock;
        let mut buckets = rules
            .iter()
            .map(|rule| {
                Ok(RuleBucket {
                    rule: *rule,
                    limiter: Governor::new(quota(rule)?, DefaultKeyedStateStore::default(), &clock),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        buckets.sort_by(|a, b| b.rule.window.cmp(&a.rule.window));
        Ok(Self { buckets, clock })
    }

    /// Number of rule buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Rule enforced by bucket `index`
    pub fn rule(&self, index: usize) -> RateRule {
        self.buckets[index].rule
    }

    /// Take one cell from bucket `index` for `identity`, or report the wait
    pub fn check(&self, index: usize, identity: &str) -> Admission {
        let key = identity.to_string();
        match self.buckets[index].limiter.check_key(&key) {
            Ok(()) => Admission::Granted,
            Err(not_until) => Admission::Wait(not_until.wait_time_from(self.clock.now())),
        }
    }

    /// Forget identities whose buckets are full again
    pub fn shrink(&self) {
        for bucket in &self.buckets {
            bucket.limiter.retain_recent();
        }
    }
}

impl std::fmt::Debug for KeyedBuckets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedBuckets")
            .field(
                "rules",
                &self.buckets.iter().map(|b| b.rule).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

fn quota(rule: &RateRule) -> Result<Quota> {
    let burst = NonZeroU32::new(rule.limit)
        .ok_or_else(|| Error::config(format!("Rate limit must be positive ({rule})")))?;
    let period = rule.window / rule.limit;

    Quota::with_period(period)
        .map(|q| q.allow_burst(burst))
        .ok_or_else(|| Error::config(format!("Rate window too small for its limit ({rule})")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_bucket_bursts_to_limit() {
        let buckets = KeyedBuckets::new(&[RateRule::per_minute(3)]).unwrap();

        for _ in 0..3 {
            assert_eq!(buckets.check(0, "caller"), Admission::Granted);
        }
        match buckets.check(0, "caller") {
            Admission::Wait(wait) => {
                assert!(wait > Duration::ZERO);
                assert!(wait <= Duration::from_secs(20));
            }
            Admission::Granted => panic!("fourth cell should wait"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_refills_with_tokio_time() {
        let buckets = KeyedBuckets::new(&[RateRule::per_second(1)]).unwrap();

        assert_eq!(buckets.check(0, "caller"), Admission::Granted);
        assert!(matches!(buckets.check(0, "caller"), Admission::Wait(_)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(buckets.check(0, "caller"), Admission::Granted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identities_have_own_buckets() {
        let buckets = KeyedBuckets::new(&[RateRule::per_second(1)]).unwrap();

        assert_eq!(buckets.check(0, "alpha"), Admission::Granted);
        assert_eq!(buckets.check(0, "beta"), Admission::Granted);
        assert!(matches!(buckets.check(0, "alpha"), Admission::Wait(_)));
    }

    #[test]
    fn test_buckets_ordered_widest_first() {
        let buckets =
            KeyedBuckets::new(&[RateRule::per_second(1), RateRule::per_day(500)]).unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets.rule(0), RateRule::per_day(500));
        assert_eq!(buckets.rule(1), RateRule::per_second(1));
    }

    #[test]
    fn test_quota_rejects_degenerate_rules() {
        assert!(quota(&RateRule::new(0, Duration::from_secs(1))).is_err());
        assert!(quota(&RateRule::new(5, Duration::ZERO)).is_err());
    }
}
