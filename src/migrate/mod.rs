//! Page Migration
//!
//! Second ledger pass and execution:
//! - [`select`]: pick hot/cold candidates with their current location
//! - [`batch`]: interleave hot and cold batches against peer nodes
//! - [`throttle`]: shared bandwidth allowance
//!
//! All sizes in the statistics are bytes.

pub mod batch;
pub mod select;
pub mod throttle;

pub use batch::MigrationBatchBuilder;
pub use select::{select_candidates, Candidate, Selection};
pub use throttle::BandwidthThrottle;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::backend::PageOutcome;
use crate::error::TierError;
use crate::page::{percent, LocationId};

bitflags::bitflags! {
    /// Which directions to migrate
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MigrateWhat: u8 {
        /// Promote hot pages to the fast tier
        const HOT = 1 << 0;
        /// Demote cold pages to the capacity tier
        const COLD = 1 << 1;
        const BOTH = Self::HOT.bits() | Self::COLD.bits();
    }
}

impl MigrateWhat {
    pub fn name(self) -> &'static str {
        match (self.contains(Self::HOT), self.contains(Self::COLD)) {
            (false, false) => "none",
            (true, false) => "hot",
            (false, true) => "cold",
            (true, true) => "both",
        }
    }
}

impl FromStr for MigrateWhat {
    type Err = TierError;

    /// Accepts `none`/`hot`/`cold`/`both` or the digits `0`..`3`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "0" => Ok(Self::empty()),
            "hot" | "1" => Ok(Self::HOT),
            "cold" | "2" => Ok(Self::COLD),
            "both" | "3" => Ok(Self::BOTH),
            other => Err(TierError::Config(format!("invalid migrate type: {}", other))),
        }
    }
}

impl fmt::Display for MigrateWhat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for MigrateWhat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for MigrateWhat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Name(String),
            Bits(u8),
        }

        let text = match Raw::deserialize(deserializer)? {
            Raw::Name(name) => name,
            Raw::Bits(bits) => bits.to_string(),
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Totals for one direction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MoveStats {
    /// Selected for moving, including pages already in place
    pub to_move: u64,
    /// Already in the target tier
    pub skip: u64,
    /// Landed on the requested node
    pub moved: u64,
    /// Rejected or landed elsewhere
    pub failed: u64,
    /// Location unknown, never attempted
    pub unresolved: u64,
    /// Source node has no peer, never attempted
    pub no_peer: u64,
    #[serde(skip)]
    outcomes: BTreeMap<(LocationId, LocationId, PageOutcome), u64>,
}

impl MoveStats {
    pub fn record(&mut self, from: LocationId, to: LocationId, outcome: PageOutcome, bytes: u64) {
        *self.outcomes.entry((from, to, outcome)).or_insert(0) += bytes;
        if outcome == PageOutcome::Landed(to) {
            self.moved += bytes;
        } else {
            self.failed += bytes;
        }
    }

    /// `(from, to, outcome) -> bytes` buckets
    pub fn outcomes(&self) -> &BTreeMap<(LocationId, LocationId, PageOutcome), u64> {
        &self.outcomes
    }

    pub fn merge(&mut self, other: &MoveStats) {
        self.to_move += other.to_move;
        self.skip += other.skip;
        self.moved += other.moved;
        self.failed += other.failed;
        self.unresolved += other.unresolved;
        self.no_peer += other.no_peer;
        for (key, bytes) in &other.outcomes {
            *self.outcomes.entry(*key).or_insert(0) += bytes;
        }
    }

    /// Plain-text summary in KB
    pub fn render(&self, label: &str) -> String {
        let mut out = String::new();
        let line = |out: &mut String, name: &str, bytes: u64| {
            out.push_str(&format!(
                "{:>15}  {:>3}%  {}\n",
                bytes >> 10,
                percent(bytes, self.to_move),
                name
            ));
        };
        out.push_str(&format!("{} {:>9} KB  to move\n", label, self.to_move >> 10));
        line(&mut out, "skip (already in place)", self.skip);
        line(&mut out, "moved", self.moved);
        line(&mut out, "failed", self.failed);
        line(&mut out, "unresolved", self.unresolved);
        line(&mut out, "no peer", self.no_peer);
        for ((from, to, outcome), bytes) in &self.outcomes {
            out.push_str(&format!("{:>15}  {} -> {}: {}\n", bytes >> 10, from, to, outcome));
        }
        out
    }
}

/// Per-direction totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationStats {
    pub promote: MoveStats,
    pub demote: MoveStats,
}

impl MigrationStats {
    pub fn merge(&mut self, other: &MigrationStats) {
        self.promote.merge(&other.promote);
        self.demote.merge(&other.demote);
    }
}
