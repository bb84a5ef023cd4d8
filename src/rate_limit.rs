// =============================================================================
// RateLimitManager — adaptive delay for HTTP collectors
// =============================================================================
//
// States: NORMAL, SLOWING, RECOVERING. Detects rate-limiting patterns from
// repeated errors and adapts delay multipliers. Shared by every HTTP
// collector job as an injected `Arc<RateLimitManager>` rather than a global
// singleton (see SPEC_FULL.md §9 / DESIGN.md).
//
// Thresholds and transition logic are ported verbatim from the Hyperliquid
// system's rate_limit_manager.py.
// =============================================================================

use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitState {
    Normal,
    Slowing,
    Recovering,
}

struct Inner {
    state: RateLimitState,
    error_count: u32,
    last_error: Option<Instant>,
    consecutive_successes: u32,
}

/// Adaptive rate-limit tracker. `error_threshold`/`max_error_count`/
/// `recovery_time` default to the original's 3 / 6 / 300s.
pub struct RateLimitManager {
    inner: Mutex<Inner>,
    error_threshold: u32,
    max_error_count: u32,
    recovery_time: Duration,
}

impl RateLimitManager {
    pub fn new(error_threshold: u32, max_error_count: u32, recovery_time: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RateLimitState::Normal,
                error_count: 0,
                last_error: None,
                consecutive_successes: 0,
            }),
            error_threshold,
            max_error_count,
            recovery_time,
        }
    }

    pub fn report_error(&self) {
        let mut inner = self.inner.lock();
        inner.error_count += 1;
        inner.last_error = Some(Instant::now());
        inner.consecutive_successes = 0;

        if inner.error_count >= self.max_error_count {
            inner.state = RateLimitState::Recovering;
        } else if inner.error_count >= self.error_threshold {
            inner.state = RateLimitState::Slowing;
        }
    }

    pub fn report_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_successes += 1;

        if inner.state != RateLimitState::Normal {
            let recovered = inner
                .last_error
                .map(|t| t.elapsed() >= self.recovery_time)
                .unwrap_or(true);

            if recovered && inner.consecutive_successes >= 5 {
                inner.error_count = inner.error_count.saturating_sub(2);
                inner.state = RateLimitState::Normal;
            }
        }
    }

    pub fn state(&self) -> RateLimitState {
        self.inner.lock().state
    }

    pub fn delay_multiplier(&self) -> f64 {
        match self.inner.lock().state {
            RateLimitState::Normal => 1.0,
            RateLimitState::Slowing => 2.0,
            RateLimitState::Recovering => 4.0,
        }
    }

    pub fn adaptive_delay(&self, base_delay: Duration) -> Duration {
        base_delay.mul_f64(self.delay_multiplier())
    }

    pub fn should_throttle(&self) -> bool {
        let inner = self.inner.lock();
        let recent = match inner.last_error {
            Some(t) if t.elapsed() <= Duration::from_secs(60) => inner.error_count,
            _ => 0,
        };
        recent >= 2
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = RateLimitState::Normal;
        inner.error_count = 0;
        inner.last_error = None;
        inner.consecutive_successes = 0;
    }
}

impl Default for RateLimitManager {
    fn default() -> Self {
        Self::new(3, 6, Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalates_through_states_on_repeated_errors() {
        let m = RateLimitManager::new(3, 6, Duration::from_secs(300));
        assert_eq!(m.state(), RateLimitState::Normal);
        for _ in 0..3 {
            m.report_error();
        }
        assert_eq!(m.state(), RateLimitState::Slowing);
        assert_eq!(m.delay_multiplier(), 2.0);
        for _ in 0..3 {
            m.report_error();
        }
        assert_eq!(m.state(), RateLimitState::Recovering);
        assert_eq!(m.delay_multiplier(), 4.0);
    }

    #[test]
    fn does_not_recover_before_five_consecutive_successes() {
        let m = RateLimitManager::new(1, 2, Duration::from_secs(0));
        m.report_error();
        m.report_error();
        assert_eq!(m.state(), RateLimitState::Recovering);
        for _ in 0..4 {
            m.report_success();
        }
        assert_eq!(m.state(), RateLimitState::Recovering);
        m.report_success();
        assert_eq!(m.state(), RateLimitState::Normal);
    }

    #[test]
    fn should_throttle_true_after_two_recent_errors() {
        let m = RateLimitManager::default();
        assert!(!m.should_throttle());
        m.report_error();
        m.report_error();
        assert!(m.should_throttle());
    }
}
