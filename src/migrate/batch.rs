//! Migration Batches
//!
//! ```text
//!   offset:   0        B        2B       3B
//!   hot:     [h h h h][h h h h][h h]
//!   cold:    [c c c c][c c c c][c c c c][c]
//!
//!   order:   hot@0, pause, cold@0, pause, hot@B, pause, cold@B, ...
//! ```
//!
//! Interleaving keeps both directions moving when one list is much longer
//! than the other. A failing batch is tallied and the next one proceeds.

use std::sync::Arc;

use crate::backend::{PageMover, PageOutcome};
use crate::topology::NumaTopology;

use super::{BandwidthThrottle, Candidate, MigrationStats, MoveStats};

pub struct MigrationBatchBuilder<'a> {
    topology: &'a NumaTopology,
    throttle: Arc<BandwidthThrottle>,
    batch_pages: usize,
}

impl<'a> MigrationBatchBuilder<'a> {
    pub fn new(topology: &'a NumaTopology, throttle: Arc<BandwidthThrottle>, batch_pages: usize) -> Self {
        Self {
            topology,
            throttle,
            batch_pages: batch_pages.max(1),
        }
    }

    /// Move `hot` and `cold` pages of `page_size` bytes, tallying into `stats`
    pub fn run(
        &self,
        mover: &dyn PageMover,
        hot: &[Candidate],
        cold: &[Candidate],
        page_size: u64,
        stats: &mut MigrationStats,
    ) {
        let mut offset = 0;
        while offset < hot.len() || offset < cold.len() {
            if let Some(batch) = window(hot, offset, self.batch_pages) {
                let bytes = self.move_batch(mover, batch, page_size, &mut stats.promote);
                self.throttle.add_and_sleep(bytes);
            }
            if let Some(batch) = window(cold, offset, self.batch_pages) {
                let bytes = self.move_batch(mover, batch, page_size, &mut stats.demote);
                self.throttle.add_and_sleep(bytes);
            }
            offset += self.batch_pages;
        }
    }

    /// Submit one batch. Returns the bytes submitted.
    fn move_batch(&self, mover: &dyn PageMover, batch: &[Candidate], page_size: u64, stats: &mut MoveStats) -> u64 {
        let mut addrs = Vec::with_capacity(batch.len());
        let mut targets = Vec::with_capacity(batch.len());
        let mut sources = Vec::with_capacity(batch.len());

        for candidate in batch {
            match self.topology.peer_of(candidate.from) {
                Some(peer) => {
                    addrs.push(candidate.addr);
                    targets.push(peer);
                    sources.push(candidate.from);
                }
                None => {
                    log::warn!(
                        "[Migrate] no peer for {}, skipping page {:#x}",
                        candidate.from,
                        candidate.addr
                    );
                    stats.no_peer += page_size;
                }
            }
        }
        if addrs.is_empty() {
            return 0;
        }

        let outcomes = match mover.move_pages(&addrs, &targets) {
            Ok(outcomes) => outcomes,
            Err(e) => {
                log::warn!("[Migrate] batch of {} pages failed: {}", addrs.len(), e);
                Vec::new()
            }
        };
        if !outcomes.is_empty() && outcomes.len() != addrs.len() {
            log::warn!(
                "[Migrate] mover returned {} outcomes for {} pages",
                outcomes.len(),
                addrs.len()
            );
        }

        for (i, (&from, &to)) in sources.iter().zip(&targets).enumerate() {
            let outcome = outcomes.get(i).copied().unwrap_or(PageOutcome::Error(libc::EIO));
            stats.record(from, to, outcome, page_size);
        }
        addrs.len() as u64 * page_size
    }
}

fn window(list: &[Candidate], offset: usize, len: usize) -> Option<&[Candidate]> {
    if offset >= list.len() {
        return None;
    }
    Some(&list[offset..(offset + len).min(list.len())])
}
