//! Anti-Thrash Guard
//!
//! Keeps `hot_threshold - cold_threshold >= gap_minimum` for every enabled
//! parameter so a page cannot be promoted one cycle and demoted the next.
//!
//! Repair order:
//! 1. raise the hot threshold, unless it is already at `walk_count`
//! 2. lower the cold threshold, unless it is already at 0
//! 3. still short: disable the parameter for this cycle
//!
//! While the tiers are far from their target ratio the guard stands aside
//! and lets bulk rebalancing converge.

use serde::Serialize;

use crate::histogram::Histogram;
use crate::page::percent;

use super::MigrationParameter;

/// Whether the guard is in force this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStage {
    /// Tiers near their target ratio
    Steady,
    /// Bulk rebalancing toward the target ratio
    RatioAdjust,
}

/// What the guard did to one parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    Bypassed,
    Satisfied,
    Repaired,
    Disabled,
}

#[derive(Debug, Clone, Copy)]
pub struct AntiThrashGuard {
    pub gap_minimum: i32,
    /// Allowed drift (percentage points) of the fast share before
    /// rebalancing takes over
    pub ratio_tolerance_percent: u8,
}

impl Default for AntiThrashGuard {
    fn default() -> Self {
        Self {
            gap_minimum: 2,
            ratio_tolerance_percent: 5,
        }
    }
}

impl AntiThrashGuard {
    pub fn new(gap_minimum: i32, ratio_tolerance_percent: u8) -> Self {
        Self {
            gap_minimum,
            ratio_tolerance_percent,
        }
    }

    /// Classify the cycle from the located byte split.
    ///
    /// Without a target percentage there is nothing to converge to, and
    /// without located bytes there is nothing to judge.
    pub fn stage(&self, fast_bytes: u64, capacity_bytes: u64, target_fast_percent: Option<u8>) -> PolicyStage {
        let Some(target) = target_fast_percent else {
            return PolicyStage::Steady;
        };
        let located = fast_bytes + capacity_bytes;
        if located == 0 {
            return PolicyStage::Steady;
        }
        let observed = percent(fast_bytes, located);
        if observed.abs_diff(target as u64) > self.ratio_tolerance_percent as u64 {
            log::info!(
                "[Policy] fast share {}% vs target {}%: ratio adjustment",
                observed,
                target
            );
            PolicyStage::RatioAdjust
        } else {
            PolicyStage::Steady
        }
    }

    /// Enforce the gap on one parameter, refilling budgets from `hist`
    pub fn enforce(&self, param: &mut MigrationParameter, hist: &Histogram, stage: PolicyStage) -> GuardOutcome {
        if stage == PolicyStage::RatioAdjust {
            return GuardOutcome::Bypassed;
        }
        if !param.enabled || param.gap() >= self.gap_minimum {
            return GuardOutcome::Satisfied;
        }

        let walk_count = param.walk_count as i32;
        let (hot, cold) = (param.hot_threshold, param.cold_threshold);

        if param.hot_threshold < walk_count {
            param.hot_threshold = (param.cold_threshold + self.gap_minimum).min(walk_count);
            param.refill_promote(hist);
        }
        if param.gap() < self.gap_minimum && param.cold_threshold > 0 {
            param.cold_threshold = (param.hot_threshold - self.gap_minimum).max(0);
            param.refill_demote(hist);
        }

        if param.gap() >= self.gap_minimum {
            log::debug!(
                "[Policy] {} thresholds {}/{} widened to {}/{}",
                param.page_size,
                hot,
                cold,
                param.hot_threshold,
                param.cold_threshold
            );
            return GuardOutcome::Repaired;
        }

        let reason = format!(
            "hot {} - cold {} < gap {} with {} walks",
            param.hot_threshold, param.cold_threshold, self.gap_minimum, walk_count
        );
        log::info!("[Policy] {} migration disabled: {}", param.page_size, reason);
        param.disable(reason);
        GuardOutcome::Disabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageSize;
    use crate::policy::{QuotaSource, ThresholdSelector};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn param(walk_count: u8, hot: i32, cold: i32) -> MigrationParameter {
        let mut p = MigrationParameter::idle(PageSize::Base, walk_count);
        p.hot_threshold = hot;
        p.cold_threshold = cold;
        p
    }

    /// Test: hot is raised first when it has room
    #[test]
    fn test_raise_hot() {
        let hist = Histogram::from_counts(12, &[10, 10, 10, 10, 10, 10]);
        let guard = AntiThrashGuard::new(2, 5);
        let mut p = param(5, 2, 1);

        assert_eq!(guard.enforce(&mut p, &hist, PolicyStage::Steady), GuardOutcome::Repaired);
        assert_eq!((p.hot_threshold, p.cold_threshold), (3, 1));
        assert_eq!(p.promote_remain, 10);
        assert_eq!(p.promote_quota, 30 << 12);
    }

    /// Test: pinned hot falls back to lowering cold
    #[test]
    fn test_lower_cold_when_hot_pinned() {
        let hist = Histogram::from_counts(12, &[10, 10, 10, 10]);
        let guard = AntiThrashGuard::new(2, 5);
        let mut p = param(3, 3, 2);

        assert_eq!(guard.enforce(&mut p, &hist, PolicyStage::Steady), GuardOutcome::Repaired);
        assert_eq!((p.hot_threshold, p.cold_threshold), (3, 1));
        assert_eq!(p.demote_quota, 20 << 12);
    }

    /// Test: both pinned and still too close disables with a reason
    #[test]
    fn test_infeasible_disables() {
        let hist = Histogram::from_counts(12, &[4, 4]);
        let guard = AntiThrashGuard::new(3, 5);
        let mut p = param(1, 1, 0);

        assert_eq!(guard.enforce(&mut p, &hist, PolicyStage::Steady), GuardOutcome::Disabled);
        assert!(!p.enabled);
        assert!(p.disabled_reason.as_deref().unwrap().contains("gap 3"));
    }

    #[test]
    fn test_bypassed_during_ratio_adjust() {
        let hist = Histogram::from_counts(12, &[1, 1, 1]);
        let guard = AntiThrashGuard::default();
        let mut p = param(2, 1, 1);
        assert_eq!(guard.enforce(&mut p, &hist, PolicyStage::RatioAdjust), GuardOutcome::Bypassed);
        assert_eq!(p.gap(), 0);
    }

    #[test]
    fn test_stage_detection() {
        let guard = AntiThrashGuard::new(2, 5);
        assert_eq!(guard.stage(50, 50, Some(50)), PolicyStage::Steady);
        assert_eq!(guard.stage(54, 46, Some(50)), PolicyStage::Steady);
        assert_eq!(guard.stage(80, 20, Some(50)), PolicyStage::RatioAdjust);
        assert_eq!(guard.stage(80, 20, None), PolicyStage::Steady);
        assert_eq!(guard.stage(0, 0, Some(50)), PolicyStage::Steady);
    }

    /// Test: after enforcement every enabled parameter keeps the gap
    #[test]
    fn test_gap_invariant_holds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let walk_count: u8 = rng.gen_range(0..12);
            let counts: Vec<u64> = (0..=walk_count).map(|_| rng.gen_range(0..50)).collect();
            let hist = Histogram::from_counts(12, &counts);
            let source = QuotaSource::TierFraction {
                fast_percent: rng.gen_range(0..=100),
            };
            let guard = AntiThrashGuard::new(rng.gen_range(1..6), 5);

            let mut p = ThresholdSelector::for_range(&hist, PageSize::Base, &source);
            guard.enforce(&mut p, &hist, PolicyStage::Steady);
            assert!(
                !p.enabled || p.gap() >= guard.gap_minimum,
                "hot {} cold {} gap {}",
                p.hot_threshold,
                p.cold_threshold,
                guard.gap_minimum
            );
        }
    }
}
