//! Configuration
//!
//! TOML file with four sections. Every field has a default, so an empty
//! file is a valid configuration.
//!
//! ```toml
//! [scan]
//! max_walks = 10
//! walk_interval_ms = 1000
//!
//! [policy]
//! fast_tier_percent = 30
//! migrate = "both"
//!
//! [migration]
//! bandwidth_mbps = 256
//!
//! [[numa.nodes]]
//! id = 0
//! tier = "fast"
//! peer = 1
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TierError, TierResult};
use crate::ledger::MAX_WALKS;
use crate::migrate::MigrateWhat;
use crate::policy::{AntiThrashGuard, QuotaSource};
use crate::topology::{NodeSpec, NumaTopology, Tier};

/// Full configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    pub scan: ScanConfig,
    pub policy: PolicyConfig,
    pub migration: MigrationConfig,
    pub numa: NumaConfig,
}

/// Walk schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Rounds per cycle, at most 255
    pub max_walks: u32,
    /// Pause between rounds
    pub walk_interval_ms: u64,
    /// Pause between cycles
    pub cycle_interval_ms: u64,
    /// Worker threads, 0 for one per CPU
    pub workers: usize,
    /// Stop walking early once the hot set is clearly too small
    pub auto_stop: bool,
    /// Smooth counters of neighbouring pages before selection
    pub smooth: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_walks: 10,
            walk_interval_ms: 1000,
            cycle_interval_ms: 0,
            workers: 0,
            auto_stop: true,
            smooth: false,
        }
    }
}

/// Placement policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Target fast-tier share of tracked memory
    pub fast_tier_percent: Option<u8>,
    /// Fixed hot threshold; needs `cold_max_refs`
    pub hot_min_refs: Option<u8>,
    /// Fixed cold threshold; needs `hot_min_refs`
    pub cold_max_refs: Option<u8>,
    /// Minimum `hot - cold` threshold distance
    pub anti_thrash_gap: i32,
    /// Fast-share drift that switches the guard off
    pub ratio_tolerance_percent: u8,
    /// Split one budget over all ranges instead of per range
    pub global_budget: bool,
    pub migrate: MigrateWhat,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            fast_tier_percent: None,
            hot_min_refs: None,
            cold_max_refs: None,
            anti_thrash_gap: 2,
            ratio_tolerance_percent: 5,
            global_budget: true,
            migrate: MigrateWhat::BOTH,
        }
    }
}

/// Migration execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// MB/s, 0 for unlimited
    pub bandwidth_mbps: u64,
    /// Pages per locate or move call
    pub batch_pages: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            bandwidth_mbps: 0,
            batch_pages: 1024,
        }
    }
}

/// Node table plus tier capacities for the capacity-ratio fallback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumaConfig {
    pub nodes: Vec<NodeSpec>,
    pub fast_capacity_mb: u64,
    pub capacity_capacity_mb: u64,
}

impl Default for NumaConfig {
    fn default() -> Self {
        Self {
            nodes: NumaTopology::two_node().nodes().to_vec(),
            fast_capacity_mb: 0,
            capacity_capacity_mb: 0,
        }
    }
}

impl TierConfig {
    /// Read, parse and validate a config file
    pub fn load(path: impl AsRef<Path>) -> TierResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::parse(&text)?;
        log::info!("[Config] loaded {}", path.display());
        Ok(config)
    }

    pub fn parse(text: &str) -> TierResult<Self> {
        let config: TierConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TierResult<()> {
        if self.scan.max_walks == 0 {
            return Err(TierError::Config("scan.max_walks must be at least 1".into()));
        }
        if self.scan.max_walks > MAX_WALKS as u32 {
            log::warn!(
                "[Config] max_walks {} limited to {}",
                self.scan.max_walks,
                MAX_WALKS
            );
        }

        let policy = &self.policy;
        if let Some(percent) = policy.fast_tier_percent {
            if percent > 100 {
                return Err(TierError::Config(format!(
                    "policy.fast_tier_percent {} not in [0, 100]",
                    percent
                )));
            }
        }
        match (policy.hot_min_refs, policy.cold_max_refs) {
            (None, None) => {}
            (Some(hot), Some(cold)) => {
                if policy.fast_tier_percent.is_some() {
                    return Err(TierError::Config(
                        "policy.fast_tier_percent conflicts with hot_min_refs/cold_max_refs".into(),
                    ));
                }
                if cold >= hot {
                    return Err(TierError::Config(format!(
                        "policy.cold_max_refs {} must be below hot_min_refs {}",
                        cold, hot
                    )));
                }
            }
            _ => {
                return Err(TierError::Config(
                    "policy.hot_min_refs and cold_max_refs must be set together".into(),
                ))
            }
        }
        if policy.anti_thrash_gap < 0 {
            return Err(TierError::Config("policy.anti_thrash_gap must not be negative".into()));
        }
        if policy.ratio_tolerance_percent > 100 {
            return Err(TierError::Config("policy.ratio_tolerance_percent not in [0, 100]".into()));
        }
        if self.migration.batch_pages == 0 {
            return Err(TierError::Config("migration.batch_pages must be at least 1".into()));
        }

        let topology = self.topology()?;
        if topology.nodes_in(Tier::Fast).next().is_none() || topology.nodes_in(Tier::Capacity).next().is_none() {
            return Err(TierError::Config("numa.nodes needs at least one node per tier".into()));
        }

        if self.needs_live_capacity() {
            log::warn!(
                "[Config] no fast_tier_percent, refs range or tier capacities: \
                 nothing migrates until live capacities are supplied"
            );
        }
        Ok(())
    }

    /// True when the quota falls back to a capacity ratio with no capacities
    pub fn needs_live_capacity(&self) -> bool {
        matches!(
            self.quota_source(),
            QuotaSource::CapacityRatio {
                fast_bytes: 0,
                capacity_bytes: 0
            }
        )
    }

    // ------------------------------------------------------------------------
    // Resolved values
    // ------------------------------------------------------------------------

    pub fn max_walks(&self) -> u8 {
        self.scan.max_walks.clamp(1, MAX_WALKS as u32) as u8
    }

    pub fn walk_interval(&self) -> Duration {
        Duration::from_millis(self.scan.walk_interval_ms)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.scan.cycle_interval_ms)
    }

    /// Fixed range, then target percentage, then configured capacities
    pub fn quota_source(&self) -> QuotaSource {
        let policy = &self.policy;
        if let (Some(hot_min), Some(cold_max)) = (policy.hot_min_refs, policy.cold_max_refs) {
            return QuotaSource::FixedRange { hot_min, cold_max };
        }
        if let Some(fast_percent) = policy.fast_tier_percent {
            return QuotaSource::TierFraction { fast_percent };
        }
        QuotaSource::CapacityRatio {
            fast_bytes: self.numa.fast_capacity_mb << 20,
            capacity_bytes: self.numa.capacity_capacity_mb << 20,
        }
    }

    pub fn guard(&self) -> AntiThrashGuard {
        AntiThrashGuard::new(self.policy.anti_thrash_gap, self.policy.ratio_tolerance_percent)
    }

    pub fn topology(&self) -> TierResult<NumaTopology> {
        NumaTopology::new(&self.numa.nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_is_default() {
        let config = TierConfig::parse("").unwrap();
        assert_eq!(config, TierConfig::default());
        assert_eq!(config.max_walks(), 10);
        assert_eq!(config.policy.migrate, MigrateWhat::BOTH);
        assert_eq!(config.topology().unwrap().nodes().len(), 2);
    }

    /// Test: only an empty capacity fallback asks for live capacities
    #[test]
    fn test_needs_live_capacity() {
        assert!(TierConfig::default().needs_live_capacity());
        assert!(!TierConfig::parse("[policy]\nfast_tier_percent = 20\n").unwrap().needs_live_capacity());
        assert!(!TierConfig::parse("[policy]\nhot_min_refs = 3\ncold_max_refs = 0\n")
            .unwrap()
            .needs_live_capacity());
        assert!(!TierConfig::parse("[numa]\nfast_capacity_mb = 1024\ncapacity_capacity_mb = 4096\n")
            .unwrap()
            .needs_live_capacity());
    }

    #[test]
    fn test_parse_full_file() {
        let text = r#"
            [scan]
            max_walks = 400
            walk_interval_ms = 50
            workers = 2

            [policy]
            fast_tier_percent = 40
            anti_thrash_gap = 3
            migrate = "hot"

            [migration]
            bandwidth_mbps = 100
            batch_pages = 64

            [[numa.nodes]]
            id = 0
            tier = "dram"
            peer = 2

            [[numa.nodes]]
            id = 2
            tier = "pmem"
            peer = 0
        "#;
        let config = TierConfig::parse(text).unwrap();
        assert_eq!(config.max_walks(), 255);
        assert_eq!(config.walk_interval(), Duration::from_millis(50));
        assert_eq!(config.quota_source(), QuotaSource::TierFraction { fast_percent: 40 });
        assert_eq!(config.policy.migrate, MigrateWhat::HOT);
        assert_eq!(config.guard().gap_minimum, 3);
        assert_eq!(config.numa.nodes[1].tier, Tier::Capacity);
    }

    #[test]
    fn test_migrate_accepts_digits() {
        let config = TierConfig::parse("[policy]\nmigrate = 2\n").unwrap();
        assert_eq!(config.policy.migrate, MigrateWhat::COLD);
        assert!(TierConfig::parse("[policy]\nmigrate = \"lukewarm\"\n").is_err());
    }

    #[test]
    fn test_fixed_range_source() {
        let config = TierConfig::parse("[policy]\nhot_min_refs = 5\ncold_max_refs = 1\n").unwrap();
        assert_eq!(
            config.quota_source(),
            QuotaSource::FixedRange { hot_min: 5, cold_max: 1 }
        );
    }

    #[test]
    fn test_rejects_bad_policy() {
        let cases = [
            "[policy]\nfast_tier_percent = 120\n",
            "[policy]\nhot_min_refs = 3\n",
            "[policy]\nhot_min_refs = 3\ncold_max_refs = 3\n",
            "[policy]\nfast_tier_percent = 50\nhot_min_refs = 3\ncold_max_refs = 1\n",
            "[policy]\nanti_thrash_gap = -1\n",
            "[scan]\nmax_walks = 0\n",
            "[migration]\nbatch_pages = 0\n",
            "[[numa.nodes]]\nid = 0\ntier = \"fast\"\n",
        ];
        for case in cases {
            assert!(TierConfig::parse(case).is_err(), "accepted: {}", case);
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scan]\nmax_walks = 4\n[policy]\nfast_tier_percent = 25").unwrap();

        let config = TierConfig::load(file.path()).unwrap();
        assert_eq!(config.max_walks(), 4);

        assert!(matches!(
            TierConfig::load("/nonexistent/memtier.toml"),
            Err(TierError::Io(_))
        ));
    }

    #[test]
    fn test_capacity_fallback() {
        let config = TierConfig::parse("[numa]\nfast_capacity_mb = 1024\ncapacity_capacity_mb = 3072\n").unwrap();
        assert_eq!(
            config.quota_source(),
            QuotaSource::CapacityRatio {
                fast_bytes: 1 << 30,
                capacity_bytes: 3 << 30,
            }
        );
    }
}
