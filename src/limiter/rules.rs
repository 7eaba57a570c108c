//! Rate rules
//!
//! A rule is a `(limit, window)` pair. A set of rules forms a composite
//! policy: a request is admitted only when every rule has spare capacity.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Named window sizes accepted in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Per {
    Second,
    Minute,
    Hour,
    Day,
    /// Thirty days
    Month,
}

impl Per {
    /// Window length for this unit
    pub fn duration(self) -> Duration {
        match self {
            Per::Second => Duration::from_secs(1),
            Per::Minute => Duration::from_secs(60),
            Per::Hour => Duration::from_secs(3_600),
            Per::Day => Duration::from_secs(86_400),
            Per::Month => Duration::from_secs(86_400 * 30),
        }
    }
}

/// A single `limit` per `window` rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateRule {
    /// Permits granted per window
    pub limit: u32,
    /// Sliding window length
    pub window: Duration,
}

impl RateRule {
    /// Create a rule with an arbitrary window
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    pub fn per_second(limit: u32) -> Self {
        Self::new(limit, Per::Second.duration())
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Per::Minute.duration())
    }

    pub fn per_hour(limit: u32) -> Self {
        Self::new(limit, Per::Hour.duration())
    }

    pub fn per_day(limit: u32) -> Self {
        Self::new(limit, Per::Day.duration())
    }

    pub fn per_month(limit: u32) -> Self {
        Self::new(limit, Per::Month.duration())
    }

    /// Window length in milliseconds
    pub fn window_ms(&self) -> i64 {
        self.window.as_millis() as i64
    }

    /// Validate a rule set and return it sorted by window length
    pub fn validate_set(rules: &[RateRule]) -> Result<Vec<RateRule>> {
        if rules.is_empty() {
            return Err(Error::config("At least one rate rule is required"));
        }

        for rule in rules {
            if rule.limit == 0 {
                return Err(Error::config(format!(
                    "Rate rule limit must be positive (got {rule})"
                )));
            }
            if rule.window.as_millis() == 0 {
                return Err(Error::config(format!(
                    "Rate rule window must be at least 1ms (got {rule})"
                )));
            }
        }

        let mut sorted = rules.to_vec();
        sorted.sort_by_key(|r| r.window);
        Ok(sorted)
    }
}

impl fmt::Display for RateRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.window.as_millis();
        if ms % 1000 == 0 {
            write!(f, "{}/{}s", self.limit, ms / 1000)
        } else {
            write!(f, "{}/{}ms", self.limit, ms)
        }
    }
}

/// Render a rule set for log lines, e.g. `1/1s, 56/60s`
pub fn describe_rules(rules: &[RateRule]) -> String {
    rules
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Per::Second, 1 ; "second")]
    #[test_case(Per::Minute, 60 ; "minute")]
    #[test_case(Per::Hour, 3_600 ; "hour")]
    #[test_case(Per::Day, 86_400 ; "day")]
    #[test_case(Per::Month, 2_592_000 ; "month")]
    fn test_per_duration(per: Per, secs: u64) {
        assert_eq!(per.duration(), Duration::from_secs(secs));
    }

    #[test]
    fn test_rule_display() {
        assert_eq!(RateRule::per_second(1).to_string(), "1/1s");
        assert_eq!(RateRule::per_minute(56).to_string(), "56/60s");
        assert_eq!(
            RateRule::new(3, Duration::from_millis(250)).to_string(),
            "3/250ms"
        );
        assert_eq!(
            describe_rules(&[RateRule::per_second(1), RateRule::per_minute(56)]),
            "1/1s, 56/60s"
        );
    }

    #[test]
    fn test_validate_set_sorts_by_window() {
        let rules = RateRule::validate_set(&[
            RateRule::per_day(1000),
            RateRule::per_second(1),
            RateRule::per_minute(56),
        ])
        .unwrap();

        assert_eq!(
            rules,
            vec![
                RateRule::per_second(1),
                RateRule::per_minute(56),
                RateRule::per_day(1000)
            ]
        );
    }

    #[test]
    fn test_validate_set_rejects_bad_rules() {
        assert!(RateRule::validate_set(&[]).is_err());
        assert!(RateRule::validate_set(&[RateRule::per_second(0)]).is_err());
        assert!(RateRule::validate_set(&[RateRule::new(5, Duration::ZERO)]).is_err());
        assert!(RateRule::validate_set(&[RateRule::new(5, Duration::from_micros(10))]).is_err());
    }

    #[test]
    fn test_per_serde() {
        let per: Per = serde_yaml::from_str("minute").unwrap();
        assert_eq!(per, Per::Minute);
    }
}
