//! Explicit ledger cursors
//!
//! The ledger keeps no hidden scan state. Each pass gets its own cursor
//! value, and the ledger rejects cursors issued for an earlier pass.
//!
//! - [`RoundCursor`]: returned by `begin_round()`, drives `record()`
//! - [`LocationCursor`]: returned by `begin_location_pass()`, drives `set_location()`
//! - [`ScanPosition`]: resumable read position for batched scans

/// Merge-scan position inside the cluster list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Position {
    /// Cluster index
    pub cluster: usize,
    /// Entry index inside the cluster
    pub index: u32,
    /// Absolute address of the entry at `index`
    pub addr: u64,
    /// Highest address requested so far in this pass
    pub high_water: u64,
}

impl Position {
    pub fn start(first_cluster_start: Option<u64>) -> Self {
        Self {
            cluster: 0,
            index: 0,
            addr: first_cluster_start.unwrap_or(u64::MAX),
            high_water: 0,
        }
    }
}

/// Update-mode cursor for one round
#[derive(Debug, Clone)]
pub struct RoundCursor {
    pub(crate) pos: Position,
    pub(crate) generation: u64,
}

/// Cursor for the post-walk location pass
#[derive(Debug, Clone)]
pub struct LocationCursor {
    pub(crate) pos: Position,
    pub(crate) generation: u64,
}

/// Resumable forward read position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanPosition {
    pub(crate) cluster: usize,
    pub(crate) index: u32,
    pub(crate) addr: u64,
}

impl ScanPosition {
    /// Position before the first entry
    pub fn start() -> Self {
        Self::default()
    }
}
