//! Threshold Selection
//!
//! Answers "which counter boundary selects about this many pages".
//!
//! ```text
//!   counter:   0    1    2    3    4   (walk_count = 4)
//!   pages:    [50] [20] [10] [ 6] [ 3]
//!                                  ◄── hot search walks down from the top
//!   cold search walks up from 0 ──►
//! ```
//!
//! The hot search stops on the bucket that exhausts the quota and then steps
//! back up one bucket, so the boundary bucket that overflowed is left out.
//! The cold search has no such step and keeps its boundary bucket.
//!
//! Both searches share their bounds with the global budget split: hot goes
//! no lower than counter 1, cold no higher than `walk_count - 1`.

use serde::{Deserialize, Serialize};

use super::MigrationParameter;
use crate::histogram::{Histogram, LocationClass};
use crate::page::PageSize;

/// Where the per-cycle quotas come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotaSource {
    /// Operator-fixed counter range: hot is `>= hot_min`, cold is `<= cold_max`
    FixedRange { hot_min: u8, cold_max: u8 },
    /// Target share of tracked bytes that should live in the fast tier
    TierFraction { fast_percent: u8 },
    /// Live fast/capacity byte capacity, measured outside this crate
    CapacityRatio { fast_bytes: u64, capacity_bytes: u64 },
}

impl QuotaSource {
    /// Hot quota in bytes for `total_bytes` of tracked memory
    pub fn hot_bytes(&self, total_bytes: u64) -> Option<u64> {
        match *self {
            QuotaSource::FixedRange { .. } => None,
            QuotaSource::TierFraction { fast_percent } => Some(scale(total_bytes, fast_percent as u64, 100)),
            QuotaSource::CapacityRatio {
                fast_bytes,
                capacity_bytes,
            } => Some(scale(total_bytes, fast_bytes, fast_bytes.saturating_add(capacity_bytes))),
        }
    }

    /// Cold quota in bytes for `total_bytes` of tracked memory
    pub fn cold_bytes(&self, total_bytes: u64) -> Option<u64> {
        match *self {
            QuotaSource::FixedRange { .. } => None,
            QuotaSource::TierFraction { fast_percent } => {
                Some(scale(total_bytes, 100 - fast_percent.min(100) as u64, 100))
            }
            QuotaSource::CapacityRatio {
                fast_bytes,
                capacity_bytes,
            } => Some(scale(total_bytes, capacity_bytes, fast_bytes.saturating_add(capacity_bytes))),
        }
    }

    /// Target fast-tier percentage, when the source defines one
    pub fn target_fast_percent(&self) -> Option<u8> {
        match *self {
            QuotaSource::TierFraction { fast_percent } => Some(fast_percent),
            _ => None,
        }
    }
}

/// Truncating `value * num / den`, 0 for an empty denominator
fn scale(value: u64, num: u64, den: u64) -> u64 {
    if den == 0 {
        return 0;
    }
    ((value as u128 * num as u128) / den as u128) as u64
}

/// Result of one threshold search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdPick {
    pub threshold: i32,
    /// Pages takeable from the boundary bucket
    pub remain: u64,
    /// Pages the pick selects in total
    pub selected: u64,
    /// Pages asked for
    pub requested: u64,
}

pub struct ThresholdSelector;

impl ThresholdSelector {
    /// Hot boundary for `quota_pages` over `column` (pages per counter)
    pub fn hot(column: &[u64], walk_count: u8, quota_pages: u64) -> ThresholdPick {
        let wc = walk_count as i32;
        if quota_pages == 0 {
            return ThresholdPick {
                threshold: wc + 1,
                remain: 0,
                selected: 0,
                requested: 0,
            };
        }

        let bucket = |t: i32| column.get(t as usize).copied().unwrap_or(0);
        let mut quota = quota_pages as i64;
        let mut t = wc;
        while t >= 1 {
            quota -= bucket(t) as i64;
            if quota <= 0 {
                break;
            }
            t -= 1;
        }
        let exhausted = quota <= 0;
        if t < wc {
            t += 1;
        }
        // counter 0 is never hot
        let t = t.max(1);

        let above: u64 = (t + 1..=wc).map(bucket).sum();
        let remain = bucket(t).min(quota_pages.saturating_sub(above));
        let pick = ThresholdPick {
            threshold: t,
            remain,
            selected: above + remain,
            requested: quota_pages,
        };
        if !exhausted && pick.selected < quota_pages {
            log::warn!(
                "[Policy] hot quota underflow: requested {} pages, found {}",
                pick.requested,
                pick.selected
            );
        }
        pick
    }

    /// Cold boundary for `quota_pages` over `column`
    pub fn cold(column: &[u64], walk_count: u8, quota_pages: u64) -> ThresholdPick {
        if quota_pages == 0 {
            return ThresholdPick {
                threshold: -1,
                remain: 0,
                selected: 0,
                requested: 0,
            };
        }

        let bucket = |t: i32| column.get(t as usize).copied().unwrap_or(0);
        let top = walk_count as i32 - 1;
        let mut quota = quota_pages as i64;
        let mut t = 0;
        let mut exhausted = false;
        while t < top {
            quota -= bucket(t) as i64;
            if quota <= 0 {
                exhausted = true;
                break;
            }
            t += 1;
        }

        let below: u64 = (0..t).map(bucket).sum();
        let remain = bucket(t).min(quota_pages.saturating_sub(below));
        let pick = ThresholdPick {
            threshold: t,
            remain,
            selected: below + remain,
            requested: quota_pages,
        };
        if !exhausted && pick.selected < quota_pages {
            log::warn!(
                "[Policy] cold quota underflow: requested {} pages, found {}",
                pick.requested,
                pick.selected
            );
        }
        pick
    }

    /// Parameter for one range judged on its own histogram
    pub fn for_range(hist: &Histogram, page_size: PageSize, source: &QuotaSource) -> MigrationParameter {
        let walk_count = hist.walk_count();
        let mut param = MigrationParameter::idle(page_size, walk_count);
        let column = hist.column(LocationClass::All);
        let shift = page_size.shift();

        match *source {
            QuotaSource::FixedRange { hot_min, cold_max } => {
                param.hot_threshold = hot_min as i32;
                param.cold_threshold = cold_max as i32;
                param.refill_promote(hist);
                param.refill_demote(hist);
            }
            _ => {
                let total = hist.bytes(LocationClass::All);
                let hot_pages = source.hot_bytes(total).unwrap_or(0) >> shift;
                let cold_pages = source.cold_bytes(total).unwrap_or(0) >> shift;

                let hot = Self::hot(column, walk_count, hot_pages);
                param.hot_threshold = hot.threshold;
                param.promote_remain = hot.remain;
                param.promote_quota = hot.selected << shift;

                let cold = Self::cold(column, walk_count, cold_pages);
                param.cold_threshold = cold.threshold;
                param.demote_remain = cold.remain;
                param.demote_quota = cold.selected << shift;
            }
        }

        log::debug!(
            "[Policy] {} walks={} hot>={} ({} KB) cold<={} ({} KB)",
            page_size,
            walk_count,
            param.hot_threshold,
            param.promote_quota >> 10,
            param.cold_threshold,
            param.demote_quota >> 10
        );
        param
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLUMN: [u64; 5] = [50, 20, 10, 6, 3];

    /// Test: quota ending inside a lower bucket steps back up one bucket
    #[test]
    fn test_hot_tie_break() {
        // 3 fits, 3+6 = 9 >= 8 exhausts at counter 3, step back to 4
        let pick = ThresholdSelector::hot(&COLUMN, 4, 8);
        assert_eq!(pick.threshold, 4);
        assert_eq!(pick.remain, 3);
        assert_eq!(pick.selected, 3);

        // exact fill of the top two buckets
        let pick = ThresholdSelector::hot(&COLUMN, 4, 9);
        assert_eq!(pick.threshold, 4);

        let pick = ThresholdSelector::hot(&COLUMN, 4, 10);
        assert_eq!(pick.threshold, 3);
        assert_eq!(pick.selected, 9);
    }

    /// Test: top bucket larger than the quota is capped by remain
    #[test]
    fn test_hot_top_bucket_capped() {
        let pick = ThresholdSelector::hot(&COLUMN, 4, 2);
        assert_eq!(pick.threshold, 4);
        assert_eq!(pick.remain, 2);
        assert_eq!(pick.selected, 2);
    }

    /// Test: running out of buckets takes everything down to counter 1
    #[test]
    fn test_hot_underflow() {
        let pick = ThresholdSelector::hot(&COLUMN, 4, 1000);
        assert_eq!(pick.threshold, 1);
        assert_eq!(pick.remain, 20);
        assert_eq!(pick.selected, 39);
        assert_eq!(pick.requested, 1000);
    }

    /// Test: counter 1 is searched like any other bucket
    #[test]
    fn test_hot_reaches_counter_one() {
        // exhausted inside counter 1, tie-break steps back to 2
        let pick = ThresholdSelector::hot(&[4, 10, 0, 0], 3, 5);
        assert_eq!(pick.threshold, 2);
        assert_eq!(pick.selected, 0);

        // counter 1 fits whole
        let pick = ThresholdSelector::hot(&[4, 10, 1, 0], 3, 12);
        assert_eq!(pick.threshold, 1);
        assert_eq!(pick.remain, 10);
        assert_eq!(pick.selected, 11);
    }

    /// Test: without walks nothing is hot
    #[test]
    fn test_hot_without_walks() {
        let pick = ThresholdSelector::hot(&[8], 0, 4);
        assert_eq!(pick.threshold, 1);
        assert_eq!(pick.selected, 0);
    }

    #[test]
    fn test_zero_quota_selects_nothing() {
        assert_eq!(ThresholdSelector::hot(&COLUMN, 4, 0).threshold, 5);
        assert_eq!(ThresholdSelector::cold(&COLUMN, 4, 0).threshold, -1);
    }

    /// Test: cold keeps its boundary bucket
    #[test]
    fn test_cold_no_tie_break() {
        let pick = ThresholdSelector::cold(&COLUMN, 4, 60);
        assert_eq!(pick.threshold, 1);
        assert_eq!(pick.remain, 10);
        assert_eq!(pick.selected, 60);

        let pick = ThresholdSelector::cold(&COLUMN, 4, 30);
        assert_eq!(pick.threshold, 0);
        assert_eq!(pick.remain, 30);
    }

    /// Test: cold never reaches the top bucket
    #[test]
    fn test_cold_upper_bound() {
        let pick = ThresholdSelector::cold(&COLUMN, 4, 1000);
        assert_eq!(pick.threshold, 3);
        assert_eq!(pick.selected, 86);
    }

    /// Test: larger quota never shrinks the hot or cold selection
    #[test]
    fn test_selection_monotonic_in_quota() {
        let columns: [&[u64]; 4] = [&COLUMN, &[0, 0, 0, 0, 0], &[1, 0, 7, 0, 40, 2, 9], &[100, 1, 1, 1, 1000]];
        for column in columns {
            let wc = (column.len() - 1) as u8;
            let mut last_hot = 0;
            let mut last_cold = 0;
            for quota in 0..1200 {
                let hot = ThresholdSelector::hot(column, wc, quota);
                let cold = ThresholdSelector::cold(column, wc, quota);
                assert!(hot.selected >= last_hot, "hot shrank at quota {}", quota);
                assert!(cold.selected >= last_cold, "cold shrank at quota {}", quota);
                last_hot = hot.selected;
                last_cold = cold.selected;
            }
        }
    }

    /// Test: raising the fast share grows hot and shrinks cold
    #[test]
    fn test_tier_fraction_monotonic() {
        let hist = Histogram::from_counts(12, &COLUMN);
        let mut last: Option<MigrationParameter> = None;
        for percent in 0..=100u8 {
            let source = QuotaSource::TierFraction { fast_percent: percent };
            let p = ThresholdSelector::for_range(&hist, PageSize::Base, &source);
            if let Some(prev) = &last {
                assert!(p.promote_quota >= prev.promote_quota, "hot shrank at {}%", percent);
                assert!(p.demote_quota <= prev.demote_quota, "cold grew at {}%", percent);
            }
            last = Some(p);
        }
    }

    #[test]
    fn test_quota_sources() {
        let fraction = QuotaSource::TierFraction { fast_percent: 30 };
        assert_eq!(fraction.hot_bytes(1000), Some(300));
        assert_eq!(fraction.cold_bytes(1000), Some(700));
        assert_eq!(fraction.target_fast_percent(), Some(30));

        let ratio = QuotaSource::CapacityRatio {
            fast_bytes: 1 << 30,
            capacity_bytes: 3 << 30,
        };
        assert_eq!(ratio.hot_bytes(1000), Some(250));
        assert_eq!(ratio.cold_bytes(1000), Some(750));

        let empty = QuotaSource::CapacityRatio {
            fast_bytes: 0,
            capacity_bytes: 0,
        };
        assert_eq!(empty.hot_bytes(1000), Some(0));

        let fixed = QuotaSource::FixedRange { hot_min: 3, cold_max: 0 };
        assert_eq!(fixed.hot_bytes(1000), None);
    }

    #[test]
    fn test_fixed_range() {
        let hist = Histogram::from_counts(12, &COLUMN);
        let source = QuotaSource::FixedRange { hot_min: 3, cold_max: 0 };
        let p = ThresholdSelector::for_range(&hist, PageSize::Base, &source);
        assert_eq!(p.hot_threshold, 3);
        assert_eq!(p.cold_threshold, 0);
        assert_eq!(p.promote_quota, 9 << 12);
        assert_eq!(p.demote_quota, 50 << 12);
    }
}
