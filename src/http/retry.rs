//! Retry state machine
//!
//! ```text
//! Acquiring ──granted──▶ Sending ──response──▶ Success
//!    ▲  │                  │  │
//!    │  └─denied─┐         │  └─other error──▶ FatalFailure
//!    │           ▼         │
//!    │      FatalFailure   └─timeout──▶ Backoff (or FatalFailure once
//!    │                                   the retry budget is spent)
//!    └──────────────elapsed──────────────┘
//! ```
//!
//! [`RetryPolicy::transition`] is pure; the dispatcher performs the returned
//! [`Effect`] and feeds the outcome back in as a [`RetryEvent`].

use crate::config::RetryConfig;
use crate::error::Result;
use std::time::Duration;

/// Where a dispatch currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Waiting for a rate-limit permit
    Acquiring { retries: u32 },
    /// Request on the wire
    Sending { retries: u32 },
    /// Sleeping before the next attempt
    Backoff { retries: u32 },
    /// A response was received
    Success,
    /// Giving up; `exhausted` marks a spent retry budget
    FatalFailure { retries: u32, exhausted: bool },
}

impl RetryState {
    /// Retries performed so far
    pub fn retries(&self) -> u32 {
        match *self {
            RetryState::Acquiring { retries }
            | RetryState::Sending { retries }
            | RetryState::Backoff { retries }
            | RetryState::FatalFailure { retries, .. } => retries,
            RetryState::Success => 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryState::Success | RetryState::FatalFailure { .. })
    }
}

/// Outcome of performing an effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryEvent {
    PermitGranted,
    PermitDenied,
    Responded,
    TransientFailure,
    FatalFailure,
    BackoffElapsed,
}

/// What the dispatcher should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Acquire,
    Send,
    Sleep(Duration),
    Deliver,
    Fail,
}

/// Bounded exponential backoff for connect and read timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Result<Self> {
        Ok(Self::new(config.max_retries, config.base_delay()?))
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry - 1)`
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(retry - 1);
        self.base_delay.saturating_mul(factor)
    }

    /// Initial state and effect
    pub fn start(&self) -> (RetryState, Effect) {
        (RetryState::Acquiring { retries: 0 }, Effect::Acquire)
    }

    /// Advance the machine by one event
    pub fn transition(&self, state: RetryState, event: RetryEvent) -> (RetryState, Effect) {
        use RetryEvent as Ev;
        use RetryState as St;

        match (state, event) {
            (St::Acquiring { retries }, Ev::PermitGranted) => {
                (St::Sending { retries }, Effect::Send)
            }
            (St::Acquiring { retries }, Ev::PermitDenied) => (
                St::FatalFailure {
                    retries,
                    exhausted: false,
                },
                Effect::Fail,
            ),
            (St::Sending { .. }, Ev::Responded) => (St::Success, Effect::Deliver),
            (St::Sending { retries }, Ev::TransientFailure) => {
                let next = retries + 1;
                if next > self.max_retries {
                    (
                        St::FatalFailure {
                            retries,
                            exhausted: true,
                        },
                        Effect::Fail,
                    )
                } else {
                    (
                        St::Backoff { retries: next },
                        Effect::Sleep(self.delay_for(next)),
                    )
                }
            }
            (St::Sending { retries }, Ev::FatalFailure) => (
                St::FatalFailure {
                    retries,
                    exhausted: false,
                },
                Effect::Fail,
            ),
            (St::Backoff { retries }, Ev::BackoffElapsed) => {
                (St::Acquiring { retries }, Effect::Acquire)
            }
            (St::Success, _) => (St::Success, Effect::Deliver),
            (St::FatalFailure { .. }, _) => (state, Effect::Fail),
            // Events that cannot happen in this state end the dispatch
            (other, _) => (
                St::FatalFailure {
                    retries: other.retries(),
                    exhausted: false,
                },
                Effect::Fail,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case(1, 2 ; "first retry")]
    #[test_case(2, 4 ; "second retry")]
    #[test_case(3, 8 ; "third retry")]
    #[test_case(10, 1024 ; "tenth retry")]
    fn test_delay_for(retry: u32, secs: u64) {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(retry), Duration::from_secs(secs));
    }

    #[test]
    fn test_delay_for_saturates() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert!(policy.delay_for(200) >= policy.delay_for(32));
    }

    #[test]
    fn test_happy_path() {
        let policy = RetryPolicy::default();
        let (state, effect) = policy.start();
        assert_eq!(effect, Effect::Acquire);

        let (state, effect) = policy.transition(state, RetryEvent::PermitGranted);
        assert_eq!(state, RetryState::Sending { retries: 0 });
        assert_eq!(effect, Effect::Send);

        let (state, effect) = policy.transition(state, RetryEvent::Responded);
        assert_eq!(state, RetryState::Success);
        assert_eq!(effect, Effect::Deliver);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_timeouts_until_exhausted() {
        let policy = RetryPolicy::default();
        let (mut state, mut effect) = policy.start();
        let mut sends = 0;
        let mut sleeps = Vec::new();

        loop {
            let event = match effect {
                Effect::Acquire => RetryEvent::PermitGranted,
                Effect::Send => {
                    sends += 1;
                    RetryEvent::TransientFailure
                }
                Effect::Sleep(delay) => {
                    sleeps.push(delay.as_secs());
                    RetryEvent::BackoffElapsed
                }
                Effect::Deliver | Effect::Fail => break,
            };
            (state, effect) = policy.transition(state, event);
        }

        assert_eq!(sends, 11);
        assert_eq!(sleeps, vec![2, 4, 8, 16, 32, 64, 128, 256, 512, 1024]);
        assert_eq!(effect, Effect::Fail);
        assert_eq!(
            state,
            RetryState::FatalFailure {
                retries: 10,
                exhausted: true
            }
        );
    }

    #[test]
    fn test_retry_reacquires_permit() {
        let policy = RetryPolicy::default();
        let state = RetryState::Sending { retries: 0 };

        let (state, effect) = policy.transition(state, RetryEvent::TransientFailure);
        assert_eq!(state, RetryState::Backoff { retries: 1 });
        assert_eq!(effect, Effect::Sleep(Duration::from_secs(2)));

        let (state, effect) = policy.transition(state, RetryEvent::BackoffElapsed);
        assert_eq!(state, RetryState::Acquiring { retries: 1 });
        assert_eq!(effect, Effect::Acquire);
    }

    #[test]
    fn test_fatal_error_is_not_retried() {
        let policy = RetryPolicy::default();
        let (state, effect) =
            policy.transition(RetryState::Sending { retries: 0 }, RetryEvent::FatalFailure);
        assert_eq!(
            state,
            RetryState::FatalFailure {
                retries: 0,
                exhausted: false
            }
        );
        assert_eq!(effect, Effect::Fail);
    }

    #[test]
    fn test_permit_denied_is_fatal() {
        let policy = RetryPolicy::default();
        let (state, effect) = policy.transition(
            RetryState::Acquiring { retries: 3 },
            RetryEvent::PermitDenied,
        );
        assert_eq!(
            state,
            RetryState::FatalFailure {
                retries: 3,
                exhausted: false
            }
        );
        assert_eq!(effect, Effect::Fail);
    }

    #[test]
    fn test_zero_retries_fails_on_first_timeout() {
        let policy = RetryPolicy::new(0, Duration::from_secs(2));
        let (state, effect) = policy.transition(
            RetryState::Sending { retries: 0 },
            RetryEvent::TransientFailure,
        );
        assert_eq!(
            state,
            RetryState::FatalFailure {
                retries: 0,
                exhausted: true
            }
        );
        assert_eq!(effect, Effect::Fail);
    }

    #[test]
    fn test_unexpected_event_fails() {
        let policy = RetryPolicy::default();
        let (state, effect) = policy.transition(
            RetryState::Acquiring { retries: 2 },
            RetryEvent::Responded,
        );
        assert_eq!(
            state,
            RetryState::FatalFailure {
                retries: 2,
                exhausted: false
            }
        );
        assert_eq!(effect, Effect::Fail);

        let (state, effect) = policy.transition(RetryState::Success, RetryEvent::BackoffElapsed);
        assert_eq!(state, RetryState::Success);
        assert_eq!(effect, Effect::Deliver);
    }

    #[test]
    fn test_from_config() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_retries: 3,
            base_delay_secs: 0.25,
        })
        .unwrap();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay_for(3), Duration::from_secs(1));

        let too_long = RetryPolicy::from_config(&RetryConfig {
            max_retries: 3,
            base_delay_secs: 1e20,
        });
        assert!(too_long.is_err());
    }
}
