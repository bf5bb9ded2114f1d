//! Ephemeral per-invocation budgets.

use probe_relay_core::RunConfig;

/// Stall-fix budget: consecutive artifact-fetch failures tolerated before
/// one retry unit is consumed.
pub(crate) const TRY_FIX_BUDGET: u32 = 3;

/// Countdown state for one run: remaining timeout, remaining retries, and
/// the stall-fix counter that absorbs single-poll fetch glitches.
#[derive(Debug)]
pub(crate) struct RunSession {
    remaining_secs: i64,
    retries: i64,
    try_fix: u32,
}

impl RunSession {
    pub(crate) fn new(config: &RunConfig) -> Self {
        Self {
            remaining_secs: i64::try_from(config.timeout).unwrap_or(i64::MAX),
            retries: i64::from(config.retries),
            try_fix: TRY_FIX_BUDGET,
        }
    }

    /// A log fetch failed; burn one stall-fix unit.
    pub(crate) fn note_fetch_failure(&mut self) {
        self.try_fix = self.try_fix.saturating_sub(1);
    }

    pub(crate) const fn retries_exhausted(&self) -> bool {
        self.retries <= 0
    }

    pub(crate) const fn needs_recovery(&self) -> bool {
        self.try_fix == 0
    }

    /// Consume one retry unit and re-arm the stall-fix counter.
    pub(crate) const fn consume_retry(&mut self) {
        self.retries -= 1;
        self.try_fix = TRY_FIX_BUDGET;
    }

    pub(crate) const fn retries_left(&self) -> i64 {
        self.retries
    }

    /// Account one poll interval against the timeout budget; returns true
    /// once the budget is spent.
    pub(crate) fn tick(&mut self, interval_secs: u64) -> bool {
        let step = i64::try_from(interval_secs).unwrap_or(i64::MAX);
        self.remaining_secs = self.remaining_secs.saturating_sub(step);
        self.remaining_secs <= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_ticks_down_in_interval_steps() {
        let config = RunConfig::new().with_timeout(10).with_sleep_interval(4);
        let mut session = RunSession::new(&config);
        assert!(!session.tick(4));
        assert!(!session.tick(4));
        assert!(session.tick(4));
    }

    #[test]
    fn test_oversized_interval_spends_the_budget_without_wrapping() {
        let config = RunConfig::new().with_timeout(10);
        let mut session = RunSession::new(&config);
        assert!(session.tick(u64::MAX));
        assert!(session.tick(u64::MAX));
    }

    #[test]
    fn test_three_failures_trigger_recovery_then_rearm() {
        let config = RunConfig::new().with_retries(2);
        let mut session = RunSession::new(&config);

        for _ in 0..3 {
            assert!(!session.needs_recovery());
            session.note_fetch_failure();
        }
        assert!(session.needs_recovery());
        assert!(!session.retries_exhausted());

        session.consume_retry();
        assert!(!session.needs_recovery());
        assert_eq!(session.retries_left(), 1);
    }

    #[test]
    fn test_zero_retry_budget_is_exhausted_from_the_start() {
        let config = RunConfig::new().with_retries(0);
        let session = RunSession::new(&config);
        assert!(session.retries_exhausted());
    }
}
