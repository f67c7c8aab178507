//! Token bucket tracking how many bytes may leave during an interval.

/// Budget can be accumulated over at most this span.
const WINDOW_MS: i64 = 500;

/// Byte budget refilled by elapsed time at a target rate and drained by
/// sends. The level never exceeds one window's worth of bytes.
pub struct IntervalBudget {
    target_rate_kbps: i64,
    max_bytes_in_budget: i64,
    bytes_remaining: i64,
    can_build_up_underuse: bool,
}

impl IntervalBudget {
    pub fn new(initial_target_rate_kbps: u32, can_build_up_underuse: bool) -> Self {
        let mut budget = Self {
            target_rate_kbps: 0,
            max_bytes_in_budget: 0,
            bytes_remaining: 0,
            can_build_up_underuse,
        };
        budget.set_target_rate_kbps(initial_target_rate_kbps);
        budget
    }

    pub fn set_target_rate_kbps(&mut self, target_rate_kbps: u32) {
        self.target_rate_kbps = target_rate_kbps as i64;
        self.max_bytes_in_budget = WINDOW_MS * self.target_rate_kbps / 8;
        self.bytes_remaining = self
            .bytes_remaining
            .clamp(-self.max_bytes_in_budget, self.max_bytes_in_budget);
    }

    pub fn target_rate_kbps(&self) -> u32 {
        self.target_rate_kbps as u32
    }

    /// Refills for `delta_time_ms` of elapsed wall time.
    pub fn increase_budget(&mut self, delta_time_ms: i64) {
        let bytes = self.target_rate_kbps * delta_time_ms / 8;
        if self.bytes_remaining < 0 || self.can_build_up_underuse {
            // Overuse is carried over; underuse only if configured.
            self.bytes_remaining =
                (self.bytes_remaining + bytes).min(self.max_bytes_in_budget);
        } else {
            self.bytes_remaining = bytes.min(self.max_bytes_in_budget);
        }
    }

    pub fn use_budget(&mut self, bytes: usize) {
        self.bytes_remaining = (self.bytes_remaining - bytes as i64)
            .max(-self.max_bytes_in_budget);
    }

    pub fn bytes_remaining(&self) -> usize {
        self.bytes_remaining.max(0) as usize
    }

    /// Remaining budget as a fraction of the window cap.
    pub fn budget_ratio(&self) -> f64 {
        if self.max_bytes_in_budget == 0 {
            return 0.0;
        }
        self.bytes_remaining as f64 / self.max_bytes_in_budget as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_accrues_with_time() {
        let mut budget = IntervalBudget::new(1000, false); // 1 Mbps
        assert_eq!(budget.bytes_remaining(), 0);

        budget.increase_budget(10);
        // 1000 kbps = 125 bytes/ms.
        assert_eq!(budget.bytes_remaining(), 1250);
    }

    #[test]
    fn test_budget_capped_at_window() {
        let mut budget = IntervalBudget::new(1000, false);
        budget.increase_budget(10_000);
        // Cap: 500 ms * 125 bytes/ms.
        assert_eq!(budget.bytes_remaining(), 62_500);
    }

    #[test]
    fn test_overuse_carried_over() {
        let mut budget = IntervalBudget::new(800, false); // 100 bytes/ms
        budget.increase_budget(10); // 1000 bytes
        budget.use_budget(3000);
        assert_eq!(budget.bytes_remaining(), 0);

        // Debt of 2000 bytes: the next 10 ms only partially repay it.
        budget.increase_budget(10);
        assert_eq!(budget.bytes_remaining(), 0);
        budget.increase_budget(10);
        assert_eq!(budget.bytes_remaining(), 0);
        budget.increase_budget(10);
        assert_eq!(budget.bytes_remaining(), 1000);
    }

    #[test]
    fn test_underuse_not_built_up_by_default() {
        let mut budget = IntervalBudget::new(800, false);
        budget.increase_budget(10);
        assert_eq!(budget.bytes_remaining(), 1000);
        // Without build-up, another tick does not add on top.
        budget.increase_budget(10);
        assert_eq!(budget.bytes_remaining(), 1000);
    }

    #[test]
    fn test_underuse_build_up_when_enabled() {
        let mut budget = IntervalBudget::new(800, true);
        budget.increase_budget(10);
        budget.increase_budget(10);
        assert_eq!(budget.bytes_remaining(), 2000);
    }

    #[test]
    fn test_rate_change_clamps_level() {
        let mut budget = IntervalBudget::new(1000, true);
        budget.increase_budget(500);
        assert_eq!(budget.bytes_remaining(), 62_500);

        budget.set_target_rate_kbps(80); // cap becomes 5000
        assert_eq!(budget.bytes_remaining(), 5000);
    }
}
