//! Candidate Selection
//!
//! Second forward pass over a ledger after the locate pass. Each entry's
//! clamped counter is compared against the cycle's parameter; the boundary
//! bucket of each side is taken only while its `remain` lasts.

use crate::ledger::AddressLedger;
use crate::page::LocationId;
use crate::policy::MigrationParameter;
use crate::topology::{NumaTopology, Tier};

use super::{MigrateWhat, MigrationStats, MoveStats};

/// Page picked for migration, with where it lives now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub addr: u64,
    pub from: LocationId,
}

/// Output of one selection pass
#[derive(Debug, Default)]
pub struct Selection {
    /// Address-ordered pages to promote
    pub hot: Vec<Candidate>,
    /// Address-ordered pages to demote
    pub cold: Vec<Candidate>,
    pub stats: MigrationStats,
}

pub fn select_candidates(
    ledger: &AddressLedger,
    param: &MigrationParameter,
    topology: &NumaTopology,
    what: MigrateWhat,
) -> Selection {
    let mut selection = Selection::default();
    if !param.enabled {
        return selection;
    }

    let page_size = ledger.page_size();
    let walk_count = ledger.walk_count();
    let want_hot = what.contains(MigrateWhat::HOT) && param.selects_hot();
    let want_cold = what.contains(MigrateWhat::COLD) && param.selects_cold();
    let mut promote_left = param.promote_remain;
    let mut demote_left = param.demote_remain;

    for entry in ledger.scan_forward() {
        let counter = entry.counter.min(walk_count) as i32;

        let hot = want_hot
            && (counter > param.hot_threshold || (counter == param.hot_threshold && take(&mut promote_left)));
        let cold = !hot
            && want_cold
            && (counter < param.cold_threshold || (counter == param.cold_threshold && take(&mut demote_left)));

        let (list, stats, target_tier) = if hot {
            (&mut selection.hot, &mut selection.stats.promote, Tier::Fast)
        } else if cold {
            (&mut selection.cold, &mut selection.stats.demote, Tier::Capacity)
        } else {
            continue;
        };

        stats.to_move += page_size;
        match topology.tier_of(entry.location) {
            Some(tier) if tier == target_tier => stats.skip += page_size,
            Some(_) => list.push(Candidate {
                addr: entry.addr,
                from: entry.location,
            }),
            None => stats.unresolved += page_size,
        }
    }

    log_selection(&selection.stats.promote, "hot", selection.hot.len());
    log_selection(&selection.stats.demote, "cold", selection.cold.len());
    selection
}

fn take(left: &mut u64) -> bool {
    if *left == 0 {
        return false;
    }
    *left -= 1;
    true
}

fn log_selection(stats: &MoveStats, side: &str, queued: usize) {
    if stats.to_move > 0 {
        log::debug!(
            "[Migrate] {} selection: {} KB, {} KB in place, {} KB unresolved, {} pages queued",
            side,
            stats.to_move >> 10,
            stats.skip >> 10,
            stats.unresolved >> 10,
            queued
        );
    }
}
