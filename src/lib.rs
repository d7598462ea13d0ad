//! memtier - Tiered Memory Placement Engine
//!
//! Tracks which virtual pages of monitored processes stay hot or go cold
//! across repeated access-bit scans, and turns that history into a
//! fast-tier / capacity-tier placement plan executed under a bandwidth
//! budget.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                         CycleController                               │
//! │   reload flag ─► prepare ─► walk ×N ─► locate ─► policy ─► migrate    │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │  WorkerPool: one job per TrackedRange per phase, barrier in between   │
//! ├───────────────────────────────┬───────────────────────────────────────┤
//! │  TrackedRange                 │  Policy                               │
//! │  ┌─────────────────────────┐  │  ┌─────────────────────────────────┐  │
//! │  │ AddressLedger (4K, 2M)  │  │  │ HistogramBuilder                │  │
//! │  │  clusters ► arena segs  │  │  │ ThresholdSelector / budget split│  │
//! │  └─────────────────────────┘  │  │ AntiThrashGuard                 │  │
//! │                               │  └─────────────────────────────────┘  │
//! ├───────────────────────────────┴───────────────────────────────────────┤
//! │  Collaborators: PageAccessSource · PageLocator · PageMover (traits)   │
//! │  MigrationBatchBuilder + BandwidthThrottle drive the mover            │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! - Compact per-address ledger: 3 bytes per tracked page, delta-encoded
//!   clusters in fixed 64 KB arena segments
//! - Refs-count histograms per node and per tier
//! - Quota-driven hot/cold thresholds with a global budget split
//! - Anti-thrash gap between promotion and demotion thresholds
//! - Interleaved, bandwidth-limited promotion and demotion batches
//! - TOML configuration with SIGHUP reload
//! - Synthetic backend (`sim` feature) for tests and the `memtier-sim` binary

pub mod backend;
pub mod config;
pub mod cycle;
pub mod error;
pub mod histogram;
pub mod ledger;
pub mod migrate;
pub mod page;
pub mod policy;
pub mod pool;
pub mod range;
pub mod report;
pub mod signal;
#[cfg(feature = "sim")]
pub mod sim;
pub mod topology;

pub use backend::{AccessEvent, PageAccessSource, PageLocator, PageMover, PageOutcome, RunKind};
pub use config::TierConfig;
pub use cycle::{AggregationContext, CycleController};
pub use error::{TierError, TierResult};
pub use histogram::{Histogram, HistogramBuilder, LocationClass};
pub use ledger::{AddressLedger, LocationCursor, RecordStatus, RoundCursor, ScanPosition};
pub use migrate::{BandwidthThrottle, MigrateWhat, MigrationBatchBuilder, MigrationStats, MoveStats};
pub use page::{LocationId, PageSize};
pub use policy::{AntiThrashGuard, MigrationParameter, PolicyStage, QuotaSource, ThresholdSelector};
pub use range::{RangeId, TrackedRange};
pub use report::CycleReport;
pub use signal::ReloadFlag;
pub use topology::{NodeSpec, NumaTopology, Tier};

/// memtier version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
