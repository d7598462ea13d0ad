//! Cycle Controller
//!
//! Drives every tracked range through one cycle at a time:
//!
//! ```text
//!   reload? ─► prepare ─► walk ×N ─► [smooth] ─► locate ─► aggregate
//!                           │  barrier    barrier            │
//!                           └─ auto-stop                     ▼
//!        report ◄─ migrate ◄─ AntiThrashGuard ◄─ calc_round_parameters
//!                  barrier
//! ```
//!
//! Ranges are handed to the [`WorkerPool`] for the walk, locate and migrate
//! phases and come back at each barrier. Everything between barriers runs on
//! the controller's thread, so aggregation needs no locking.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::backend::{PageAccessSource, PageLocator, PageMover};
use crate::config::TierConfig;
use crate::error::{TierError, TierResult};
use crate::histogram::{Histogram, LocationClass};
use crate::migrate::{BandwidthThrottle, MigrationStats};
use crate::page::PageSize;
use crate::policy::budget::{RangeHistograms, RangeParameters};
use crate::policy::{calc_round_parameters, AntiThrashGuard, QuotaSource, ThresholdSelector};
use crate::pool::{Phase, WorkerPool};
use crate::range::{RangeEnv, RangeId, TrackedRange, WalkStats};
use crate::report::{CycleReport, GuardSummary, HistogramReport, RangeReport};
use crate::signal::ReloadFlag;

/// Granularity of the pause between cycles when watching a stop flag
const STOP_POLL: Duration = Duration::from_millis(100);

// ============================================================================
// Aggregation
// ============================================================================

/// Totals gathered across all ranges during one cycle
#[derive(Debug, Clone)]
pub struct AggregationContext {
    pub walk: WalkStats,
    /// Global histogram per page size
    pub histograms: RangeHistograms,
    pub migration: MigrationStats,
}

impl Default for AggregationContext {
    fn default() -> Self {
        Self {
            walk: WalkStats::default(),
            histograms: empty_histograms(),
            migration: MigrationStats::default(),
        }
    }
}

impl AggregationContext {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Sum young/top/all bytes after a walk barrier
    pub fn gather_walk(&mut self, ranges: &[Box<TrackedRange>]) {
        let mut walk = WalkStats::default();
        for stats in ranges.iter().map(|r| r.walk_stats()) {
            walk.young += stats.young;
            walk.top += stats.top;
            walk.all += stats.all;
            walk.dropped += stats.dropped;
        }
        self.walk = walk;
    }

    /// Fold per-range histograms into the global ones
    pub fn gather_histograms(&mut self, per_range: &[RangeHistograms]) -> TierResult<()> {
        self.histograms = empty_histograms();
        for hists in per_range {
            for (global, hist) in self.histograms.iter_mut().zip(hists) {
                global.merge(hist)?;
            }
        }
        Ok(())
    }

    pub fn gather_migration(&mut self, ranges: &[Box<TrackedRange>]) {
        self.migration = MigrationStats::default();
        for range in ranges {
            self.migration.merge(range.migration_stats());
        }
    }

    /// Located bytes as `(fast, capacity, unknown)`
    pub fn tier_bytes(&self) -> (u64, u64, u64) {
        let sum = |class| self.histograms.iter().map(|h| h.bytes(class)).sum::<u64>();
        (
            sum(LocationClass::FastTier),
            sum(LocationClass::CapacityTier),
            sum(LocationClass::Unknown),
        )
    }
}

fn empty_histograms() -> RangeHistograms {
    [
        Histogram::new(0, PageSize::Base.shift()),
        Histogram::new(0, PageSize::Huge.shift()),
    ]
}

/// Whether enough rounds have been walked to tell hot from cold.
///
/// Only with a target share and after more than two rounds: stop once the
/// pages accessed in every round fall below half the target share.
pub fn should_stop_walking(walks: u8, walk: &WalkStats, target_fast_percent: Option<u8>) -> bool {
    let Some(percent) = target_fast_percent else {
        return false;
    };
    if walks <= 2 || walk.all == 0 {
        return false;
    }
    2 * 100 * (walk.top as u128) < percent as u128 * walk.all as u128
}

// ============================================================================
// Controller
// ============================================================================

pub struct CycleController {
    config: TierConfig,
    config_path: Option<PathBuf>,
    pending: Option<TierConfig>,
    env: Arc<RangeEnv>,
    guard: AntiThrashGuard,
    pool: WorkerPool,
    ranges: Vec<Box<TrackedRange>>,
    reload: ReloadFlag,
    /// Live `(fast, capacity)` tier sizes for the capacity-ratio fallback
    tier_capacity: Option<(u64, u64)>,
    ctx: AggregationContext,
    cycle: u64,
}

impl CycleController {
    /// Build a controller. `config_path` is re-read on reload requests.
    pub fn new(config: TierConfig, config_path: Option<PathBuf>) -> TierResult<Self> {
        config.validate()?;
        let env = build_env(&config)?;
        let pool = WorkerPool::new(config.scan.workers)?;
        Ok(Self {
            guard: config.guard(),
            config,
            config_path,
            pending: None,
            env,
            pool,
            ranges: Vec::new(),
            reload: ReloadFlag::new(),
            tier_capacity: None,
            ctx: AggregationContext::default(),
            cycle: 0,
        })
    }

    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    /// Handle for requesting a reload, e.g. from a signal handler
    pub fn reload_flag(&self) -> ReloadFlag {
        self.reload.clone()
    }

    /// Queue `config` to replace the current one at the next cycle
    pub fn stage_config(&mut self, config: TierConfig) {
        self.pending = Some(config);
        self.reload.request();
    }

    /// Report measured tier sizes, used when no percentage or fixed range
    /// is configured
    pub fn set_tier_capacity(&mut self, fast_bytes: u64, capacity_bytes: u64) {
        self.tier_capacity = Some((fast_bytes, capacity_bytes));
    }

    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    pub fn ranges(&self) -> impl Iterator<Item = &TrackedRange> {
        self.ranges.iter().map(|r| r.as_ref())
    }

    pub fn context(&self) -> &AggregationContext {
        &self.ctx
    }

    pub fn add_range(
        &mut self,
        id: RangeId,
        start: u64,
        end: u64,
        source: Box<dyn PageAccessSource>,
        locator: Arc<dyn PageLocator>,
        mover: Arc<dyn PageMover>,
    ) -> TierResult<()> {
        if self.ranges.iter().any(|r| r.id() == id) {
            return Err(TierError::Config(format!("range {} already tracked", id)));
        }
        let range = TrackedRange::new(id, start, end, source, locator, mover, Arc::clone(&self.env))?;
        log::info!("[Cycle] tracking range {} {:#x}-{:#x}", id, start, end);
        self.ranges.push(Box::new(range));
        Ok(())
    }

    /// Stop tracking `id` and release its ledgers
    pub fn retire_range(&mut self, id: RangeId) -> bool {
        let Some(pos) = self.ranges.iter().position(|r| r.id() == id) else {
            return false;
        };
        let mut range = self.ranges.remove(pos);
        range.retire();
        log::info!("[Cycle] range {} retired", id);
        true
    }

    /// Run one full cycle
    pub fn run_cycle(&mut self) -> TierResult<CycleReport> {
        if self.reload.take() {
            self.reload();
        }

        let started = Instant::now();
        let max_walks = self.config.max_walks();
        let source = self.quota_source();
        let target = source.target_fast_percent();

        self.ctx.reset();
        for range in &mut self.ranges {
            range.prepare()?;
        }

        // Walk
        let mut walks = 0u8;
        let mut auto_stopped = false;
        while walks < max_walks {
            if walks > 0 && !self.config.walk_interval().is_zero() {
                thread::sleep(self.config.walk_interval());
            }
            self.pool.dispatch(&mut self.ranges, &Phase::Walk)?;
            walks += 1;
            self.ctx.gather_walk(&self.ranges);
            log::debug!(
                "[Cycle] walk {}: young {} KB, top {} KB, all {} KB",
                walks,
                self.ctx.walk.young >> 10,
                self.ctx.walk.top >> 10,
                self.ctx.walk.all >> 10
            );
            if self.config.scan.auto_stop && walks < max_walks && should_stop_walking(walks, &self.ctx.walk, target) {
                auto_stopped = true;
                break;
            }
        }
        if self.config.scan.smooth {
            for range in &mut self.ranges {
                range.smooth();
            }
        }

        // Locate and aggregate
        self.pool.dispatch(&mut self.ranges, &Phase::Locate)?;
        let per_range: Vec<RangeHistograms> = self
            .ranges
            .iter()
            .map(|r| r.histograms().cloned().unwrap_or_else(|| r.empty_histograms()))
            .collect();
        self.ctx.gather_histograms(&per_range)?;

        // Policy
        let (fast, capacity, unknown) = self.ctx.tier_bytes();
        let stage = self.guard.stage(fast, capacity, target);
        let mut params = if self.config.policy.global_budget {
            calc_round_parameters(&per_range, &source)
        } else {
            per_range
                .iter()
                .map(|hists| {
                    PageSize::ALL.map(|size| ThresholdSelector::for_range(&hists[size.index()], size, &source))
                })
                .collect::<Vec<RangeParameters>>()
        };
        let mut guard = GuardSummary::default();
        for (pair, hists) in params.iter_mut().zip(&per_range) {
            for (param, hist) in pair.iter_mut().zip(hists) {
                guard.count(self.guard.enforce(param, hist, stage));
            }
        }

        // Migrate
        if !self.env.migrate.is_empty() {
            self.pool.dispatch(&mut self.ranges, &Phase::Migrate(params.clone()))?;
            self.ctx.gather_migration(&self.ranges);
        }

        let report = CycleReport {
            cycle: self.cycle,
            walks,
            auto_stopped,
            stage,
            walk: self.ctx.walk,
            fast_bytes: fast,
            capacity_bytes: capacity,
            unknown_bytes: unknown,
            histograms: PageSize::ALL
                .iter()
                .map(|&size| HistogramReport::from_histogram(size, &self.ctx.histograms[size.index()]))
                .collect(),
            guard,
            ranges: self
                .ranges
                .iter()
                .zip(params)
                .map(|(range, params)| {
                    let (start, end) = range.bounds();
                    RangeReport {
                        id: range.id(),
                        start,
                        end,
                        walk: range.walk_stats(),
                        params: params.to_vec(),
                        migration: range.migration_stats().clone(),
                        error: range.last_error().map(str::to_owned),
                    }
                })
                .collect(),
            migration: self.ctx.migration.clone(),
            outcomes: CycleReport::collect_outcomes(&self.ctx.migration),
        };

        log::info!(
            "[Cycle] cycle {} done in {:?}: {} walks, promoted {} KB, demoted {} KB",
            self.cycle,
            started.elapsed(),
            walks,
            self.ctx.migration.promote.moved >> 10,
            self.ctx.migration.demote.moved >> 10
        );
        self.cycle += 1;
        Ok(report)
    }

    /// Run cycles until `stop` is raised or `max_cycles` have completed.
    /// Returns the number of cycles run.
    pub fn run_until(
        &mut self,
        stop: &AtomicBool,
        max_cycles: Option<u64>,
        mut on_report: impl FnMut(&CycleReport),
    ) -> TierResult<u64> {
        let mut done = 0;
        while !stop.load(Ordering::Relaxed) && max_cycles.map_or(true, |max| done < max) {
            let report = self.run_cycle()?;
            on_report(&report);
            done += 1;

            let mut pause = self.config.cycle_interval();
            while !pause.is_zero() && !stop.load(Ordering::Relaxed) {
                let step = pause.min(STOP_POLL);
                thread::sleep(step);
                pause -= step;
            }
        }
        Ok(done)
    }

    pub fn shutdown(&mut self) {
        for range in &mut self.ranges {
            range.retire();
        }
        self.ranges.clear();
        self.pool.shutdown();
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn quota_source(&self) -> QuotaSource {
        match (self.config.quota_source(), self.tier_capacity) {
            (QuotaSource::CapacityRatio { .. }, Some((fast_bytes, capacity_bytes))) => QuotaSource::CapacityRatio {
                fast_bytes,
                capacity_bytes,
            },
            (source, _) => source,
        }
    }

    fn reload(&mut self) {
        let next = match (self.pending.take(), &self.config_path) {
            (Some(config), _) => Ok(config),
            (None, Some(path)) => TierConfig::load(path),
            (None, None) => {
                log::info!("[Cycle] reload requested without a config file, ignored");
                return;
            }
        };
        match next.and_then(|config| self.apply(config)) {
            Ok(()) => log::info!("[Cycle] configuration reloaded"),
            Err(e) => log::warn!("[Cycle] reload failed, keeping previous configuration: {}", e),
        }
    }

    fn apply(&mut self, config: TierConfig) -> TierResult<()> {
        config.validate()?;
        let env = build_env(&config)?;
        if config.scan.workers != self.config.scan.workers {
            self.pool = WorkerPool::new(config.scan.workers)?;
        }
        for range in &mut self.ranges {
            range.set_env(Arc::clone(&env));
        }
        self.guard = config.guard();
        self.env = env;
        self.config = config;
        Ok(())
    }
}

impl Drop for CycleController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn build_env(config: &TierConfig) -> TierResult<Arc<RangeEnv>> {
    Ok(Arc::new(RangeEnv {
        topology: config.topology()?,
        throttle: Arc::new(BandwidthThrottle::from_mbps(config.migration.bandwidth_mbps)),
        batch_pages: config.migration.batch_pages,
        migrate: config.policy.migrate,
    }))
}
