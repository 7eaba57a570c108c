//! Sliding-window log admission for shared stores
//!
//! Each identity owns an ascending list of grant timestamps (epoch millis).
//! A request is admitted when every rule has fewer than `limit` grants
//! inside its window; the grant is then recorded once and counts against
//! all rules at the same time.

use super::rules::RateRule;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of a single admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Permit granted and recorded
    Granted,
    /// No capacity yet; the earliest time another attempt can succeed
    Wait(Duration),
}

/// Grant history for one identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrantLog {
    stamps: Vec<i64>,
}

impl GrantLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of grants still tracked
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    /// Try to admit one request at `now_ms` against all `rules`.
    ///
    /// `rules` must be non-empty.
    pub fn admit(&mut self, rules: &[RateRule], now_ms: i64) -> Admission {
        let widest = rules.iter().map(RateRule::window_ms).max().unwrap_or(0);
        self.expire(now_ms - widest);

        let mut wait_ms = 0_i64;
        for rule in rules {
            let start = now_ms - rule.window_ms();
            let first = self.stamps.partition_point(|&ts| ts <= start);
            let in_window = &self.stamps[first..];
            let limit = rule.limit as usize;

            if in_window.len() >= limit {
                // The grant that has to age out before one more fits
                let blocker = in_window[in_window.len() - limit];
                wait_ms = wait_ms.max(blocker + rule.window_ms() - now_ms);
            }
        }

        if wait_ms > 0 {
            return Admission::Wait(Duration::from_millis(wait_ms as u64));
        }

        // Stamps from other processes may be slightly ahead of our clock
        let at = self.stamps.partition_point(|&ts| ts <= now_ms);
        self.stamps.insert(at, now_ms);
        Admission::Granted
    }

    /// Drop grants at or before `cutoff_ms`
    pub fn expire(&mut self, cutoff_ms: i64) {
        let keep_from = self.stamps.partition_point(|&ts| ts <= cutoff_ms);
        self.stamps.drain(..keep_from);
    }
}
