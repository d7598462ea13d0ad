//! Cycle Reports
//!
//! One [`CycleReport`] per completed cycle. It serializes to JSON for
//! machine consumers and renders as plain text for operators:
//!
//! ```text
//!  refs        4K KB       2M KB
//!     0        81920           0
//!     1         4096        2048
//!   ...
//! ```

use serde::Serialize;

use crate::histogram::{Histogram, LocationClass};
use crate::migrate::{MigrationStats, MoveStats};
use crate::page::{LocationId, PageSize};
use crate::policy::{GuardOutcome, MigrationParameter, PolicyStage};
use crate::range::{RangeId, WalkStats};

/// Bytes per counter value for one page size
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistogramReport {
    pub page_size: PageSize,
    pub rows: Vec<HistogramRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistogramRow {
    pub refs: u8,
    pub all_kb: u64,
    pub fast_kb: u64,
    pub capacity_kb: u64,
    pub unknown_kb: u64,
}

impl HistogramReport {
    pub fn from_histogram(page_size: PageSize, hist: &Histogram) -> Self {
        let kb = |class, refs: usize| (hist.count(class, refs) << hist.page_shift()) >> 10;
        let rows = (0..=hist.walk_count() as usize)
            .map(|refs| HistogramRow {
                refs: refs as u8,
                all_kb: kb(LocationClass::All, refs),
                fast_kb: kb(LocationClass::FastTier, refs),
                capacity_kb: kb(LocationClass::CapacityTier, refs),
                unknown_kb: kb(LocationClass::Unknown, refs),
            })
            .collect();
        Self { page_size, rows }
    }
}

/// Guard decisions of one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GuardSummary {
    pub bypassed: u32,
    pub satisfied: u32,
    pub repaired: u32,
    pub disabled: u32,
}

impl GuardSummary {
    pub fn count(&mut self, outcome: GuardOutcome) {
        match outcome {
            GuardOutcome::Bypassed => self.bypassed += 1,
            GuardOutcome::Satisfied => self.satisfied += 1,
            GuardOutcome::Repaired => self.repaired += 1,
            GuardOutcome::Disabled => self.disabled += 1,
        }
    }
}

/// One `(direction, from, to, outcome)` bucket of moved bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeBucket {
    pub direction: &'static str,
    pub from: LocationId,
    pub to: LocationId,
    pub outcome: String,
    pub bytes: u64,
}

/// Per-range slice of a cycle
#[derive(Debug, Clone, Serialize)]
pub struct RangeReport {
    pub id: RangeId,
    pub start: u64,
    pub end: u64,
    pub walk: WalkStats,
    pub params: Vec<MigrationParameter>,
    pub migration: MigrationStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    /// Rounds actually walked
    pub walks: u8,
    /// Whether the walk loop stopped before `max_walks`
    pub auto_stopped: bool,
    pub stage: PolicyStage,
    pub walk: WalkStats,
    pub fast_bytes: u64,
    pub capacity_bytes: u64,
    pub unknown_bytes: u64,
    pub histograms: Vec<HistogramReport>,
    pub guard: GuardSummary,
    pub ranges: Vec<RangeReport>,
    pub migration: MigrationStats,
    pub outcomes: Vec<OutcomeBucket>,
}

impl CycleReport {
    /// Flatten the outcome maps of `migration` into [`OutcomeBucket`]s
    pub fn collect_outcomes(migration: &MigrationStats) -> Vec<OutcomeBucket> {
        let flatten = |direction: &'static str, stats: &MoveStats| {
            stats
                .outcomes()
                .iter()
                .map(move |(&(from, to, outcome), &bytes)| OutcomeBucket {
                    direction,
                    from,
                    to,
                    outcome: outcome.to_string(),
                    bytes,
                })
                .collect::<Vec<_>>()
        };
        let mut buckets = flatten("promote", &migration.promote);
        buckets.extend(flatten("demote", &migration.demote));
        buckets
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Operator-facing text: refs table, parameters, move summaries
    pub fn render_text(&self) -> String {
        let mut out = format!(
            "cycle {}: {} walks{}, stage {:?}, young {} KB, top {} KB, all {} KB\n",
            self.cycle,
            self.walks,
            if self.auto_stopped { " (auto-stopped)" } else { "" },
            self.stage,
            self.walk.young >> 10,
            self.walk.top >> 10,
            self.walk.all >> 10
        );
        out.push_str(&render_refs_table(&self.histograms));

        for range in &self.ranges {
            for p in &range.params {
                out.push_str(&format!(
                    "range {} {}: hot >= {} (+{} pages) cold <= {} (+{} pages){}\n",
                    range.id,
                    p.page_size,
                    p.hot_threshold,
                    p.promote_remain,
                    p.cold_threshold,
                    p.demote_remain,
                    match &p.disabled_reason {
                        Some(reason) => format!(" disabled: {}", reason),
                        None => String::new(),
                    }
                ));
            }
            if let Some(error) = &range.error {
                out.push_str(&format!("range {} error: {}\n", range.id, error));
            }
        }

        out.push_str(&self.migration.promote.render("promote"));
        out.push_str(&self.migration.demote.render("demote"));
        out
    }
}

/// Refs table in KB, one column per page size
pub fn render_refs_table(histograms: &[HistogramReport]) -> String {
    let rows = histograms.iter().map(|h| h.rows.len()).max().unwrap_or(0);
    let mut out = String::from(" refs");
    for h in histograms {
        out.push_str(&format!("  {:>10}", format!("{} KB", h.page_size)));
    }
    out.push('\n');

    for refs in 0..rows {
        out.push_str(&format!("{:>5}", refs));
        for h in histograms {
            let kb = h.rows.get(refs).map_or(0, |row| row.all_kb);
            out.push_str(&format!("  {:>10}", kb));
        }
        out.push('\n');
    }
    out
}
