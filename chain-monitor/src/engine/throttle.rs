//! Adaptive throttle and circuit breaker (C6).
//!
//! Tracks rate-limit errors per chain in a bounded ring buffer and derives a
//! [`Policy`] from the recent error rate. The breaker shape (max-errors
//! threshold, cooldown, trip tracking) follows the same idiom as a
//! max-errors/cooldown circuit breaker; the ring-buffer error-rate tiers on
//! top of it are this service's own addition.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use crate::types::enums::Policy;

const RING_CAPACITY: usize = 20;
const MODERATE_THRESHOLD_PER_MIN: u32 = 3;
const AGGRESSIVE_THRESHOLD_PER_MIN: u32 = 6;

struct ThrottleState {
    rate_limit_events: VecDeque<Instant>,
    consecutive_rate_limit_errors: u32,
    breaker_open_until: Option<Instant>,
}

impl ThrottleState {
    fn new() -> Self {
        Self {
            rate_limit_events: VecDeque::with_capacity(RING_CAPACITY),
            consecutive_rate_limit_errors: 0,
            breaker_open_until: None,
        }
    }

    fn events_in_last_minute(&self) -> u32 {
        let cutoff = Instant::now() - Duration::from_secs(60);
        u32::try_from(self.rate_limit_events.iter().filter(|t| **t >= cutoff).count())
            .unwrap_or(u32::MAX)
    }
}

/// Per-chain adaptive throttle and circuit breaker.
///
/// One instance is owned by each chain's worker; nothing here is shared
/// across chains.
pub struct Throttle {
    state: Mutex<ThrottleState>,
    breaker_threshold: u32,
    breaker_cooldown: Duration,
    errors_per_minute_cap: u32,
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("breaker_threshold", &self.breaker_threshold)
            .field("breaker_cooldown", &self.breaker_cooldown)
            .field("errors_per_minute_cap", &self.errors_per_minute_cap)
            .finish_non_exhaustive()
    }
}

impl Throttle {
    /// Create a throttle with the given breaker trip threshold, cooldown,
    /// and per-minute rate-limit error cap (all from `EngineSettings`).
    #[must_use]
    pub fn new(breaker_threshold: u32, breaker_cooldown: Duration, errors_per_minute_cap: u32) -> Self {
        Self {
            state: Mutex::new(ThrottleState::new()),
            breaker_threshold,
            breaker_cooldown,
            errors_per_minute_cap,
        }
    }

    /// Record a successful RPC call, resetting the consecutive-error streak.
    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("throttle lock poisoned");
        state.consecutive_rate_limit_errors = 0;
    }

    /// Record a rate-limited RPC call, returning the policy that now applies.
    ///
    /// Trips the breaker when either the consecutive-error streak or the
    /// per-minute event rate crosses its configured cap.
    #[instrument(skip(self))]
    pub fn record_rate_limited(&self) -> Policy {
        let mut state = self.state.lock().expect("throttle lock poisoned");

        let now = Instant::now();
        if state.rate_limit_events.len() == RING_CAPACITY {
            state.rate_limit_events.pop_front();
        }
        state.rate_limit_events.push_back(now);
        state.consecutive_rate_limit_errors += 1;

        let events_per_min = state.events_in_last_minute();
        if state.consecutive_rate_limit_errors >= self.breaker_threshold
            || events_per_min >= self.errors_per_minute_cap
        {
            state.breaker_open_until = Some(now + self.breaker_cooldown);
            warn!(
                consecutive = state.consecutive_rate_limit_errors,
                events_per_min, "circuit breaker tripped"
            );
            return Policy::Open;
        }

        let policy = policy_for_rate(events_per_min);
        if policy != Policy::Normal {
            info!(events_per_min, ?policy, "throttle tier escalated");
        }
        policy
    }

    /// Current policy, without recording an event. `Open` until the breaker
    /// cooldown elapses, at which point it resets to the error-rate tier.
    #[must_use]
    pub fn current_policy(&self) -> Policy {
        let mut state = self.state.lock().expect("throttle lock poisoned");
        if let Some(reopen_at) = state.breaker_open_until {
            if Instant::now() < reopen_at {
                return Policy::Open;
            }
            state.breaker_open_until = None;
            state.consecutive_rate_limit_errors = 0;
        }
        policy_for_rate(state.events_in_last_minute())
    }

    /// Seconds remaining until the breaker resets, if it is currently open.
    #[must_use]
    pub fn breaker_reopen_in_secs(&self) -> Option<u64> {
        let state = self.state.lock().expect("throttle lock poisoned");
        state.breaker_open_until.map(|reopen_at| {
            reopen_at.saturating_duration_since(Instant::now()).as_secs()
        })
    }

    /// Consecutive rate-limit errors observed, for diagnostics.
    #[must_use]
    pub fn consecutive_rate_limit_errors(&self) -> u32 {
        self.state.lock().expect("throttle lock poisoned").consecutive_rate_limit_errors
    }

    /// Batch size to use for the current policy, and the pause between
    /// batches.
    #[must_use]
    pub fn batch_params(&self, configured_concurrent_blocks: u32, configured_batch_pause: Duration) -> (u32, Duration) {
        match self.current_policy() {
            Policy::Normal => (configured_concurrent_blocks, configured_batch_pause),
            Policy::Moderate => (configured_concurrent_blocks, Duration::from_millis(500)),
            Policy::Aggressive | Policy::Open => (1, configured_batch_pause.max(Duration::from_secs(1))),
        }
    }
}

const fn policy_for_rate(events_per_min: u32) -> Policy {
    if events_per_min > AGGRESSIVE_THRESHOLD_PER_MIN {
        Policy::Aggressive
    } else if events_per_min > MODERATE_THRESHOLD_PER_MIN {
        Policy::Moderate
    } else {
        Policy::Normal
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn throttle() -> Throttle {
        Throttle::new(12, Duration::from_millis(50), 20)
    }

    #[rstest]
    #[case(3, Policy::Normal)]
    #[case(4, Policy::Moderate)]
    #[case(6, Policy::Moderate)]
    #[case(7, Policy::Aggressive)]
    fn tier_boundaries_match_spec_thresholds(#[case] events: u32, #[case] expected: Policy) {
        let t = Throttle::new(1000, Duration::from_millis(50), 1000);
        for _ in 0..events {
            t.record_rate_limited();
        }
        assert_eq!(t.current_policy(), expected);
    }

    #[test]
    fn starts_normal() {
        let t = throttle();
        assert_eq!(t.current_policy(), Policy::Normal);
    }

    #[test]
    fn escalates_to_moderate_after_four_events_per_minute() {
        let t = throttle();
        for _ in 0..4 {
            t.record_rate_limited();
        }
        assert_eq!(t.current_policy(), Policy::Moderate);
    }

    #[test]
    fn escalates_to_aggressive_after_seven_events_per_minute() {
        let t = throttle();
        let mut last = Policy::Normal;
        for _ in 0..7 {
            last = t.record_rate_limited();
        }
        assert_eq!(last, Policy::Aggressive);
    }

    #[test]
    fn success_resets_consecutive_streak() {
        let t = throttle();
        t.record_rate_limited();
        t.record_rate_limited();
        assert_eq!(t.consecutive_rate_limit_errors(), 2);
        t.record_success();
        assert_eq!(t.consecutive_rate_limit_errors(), 0);
    }

    #[test]
    fn breaker_trips_on_consecutive_threshold() {
        let t = Throttle::new(3, Duration::from_millis(50), 1000);
        t.record_rate_limited();
        t.record_rate_limited();
        let policy = t.record_rate_limited();
        assert_eq!(policy, Policy::Open);
        assert_eq!(t.current_policy(), Policy::Open);
    }

    #[tokio::test]
    async fn breaker_resets_after_cooldown() {
        let t = Throttle::new(2, Duration::from_millis(10), 1000);
        t.record_rate_limited();
        t.record_rate_limited();
        assert_eq!(t.current_policy(), Policy::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_ne!(t.current_policy(), Policy::Open);
    }

    #[test]
    fn batch_params_collapse_under_aggressive() {
        let t = Throttle::new(100, Duration::from_millis(50), 1000);
        for _ in 0..7 {
            t.record_rate_limited();
        }
        let (concurrent, pause) = t.batch_params(8, Duration::from_millis(0));
        assert_eq!(concurrent, 1);
        assert!(pause >= Duration::from_secs(1));
    }

    #[test]
    fn ring_buffer_is_bounded() {
        let t = throttle();
        for _ in 0..50 {
            t.record_rate_limited();
        }
        let state = t.state.lock().unwrap();
        assert!(state.rate_limit_events.len() <= 20);
    }

    proptest::proptest! {
        /// Escalation is monotonic in the event count: a throttle that has
        /// seen at least as many rate-limit events as another, in the same
        /// window, is never at a calmer tier.
        #[test]
        fn policy_escalates_monotonically_with_event_count(fewer in 0u32..15, extra in 0u32..15) {
            let more = fewer + extra;
            let a = Throttle::new(1000, Duration::from_millis(50), 1000);
            let b = Throttle::new(1000, Duration::from_millis(50), 1000);
            for _ in 0..fewer {
                a.record_rate_limited();
            }
            for _ in 0..more {
                b.record_rate_limited();
            }
            proptest::prop_assert!(tier_rank(b.current_policy()) >= tier_rank(a.current_policy()));
        }
    }

    fn tier_rank(p: Policy) -> u8 {
        match p {
            Policy::Normal => 0,
            Policy::Moderate => 1,
            Policy::Aggressive => 2,
            Policy::Open => 3,
        }
    }
}
