//! Collaborator Interfaces
//!
//! The three privileged pieces this crate drives but does not implement:
//!
//! | Trait              | Real backend                      | Called from        |
//! |--------------------|-----------------------------------|--------------------|
//! | `PageAccessSource` | page-table access-bit walker      | walk job           |
//! | `PageLocator`      | `move_pages(2)` with NULL nodes   | locate job         |
//! | `PageMover`        | `move_pages(2)` with target nodes | migrate job        |
//!
//! A source is owned by one range and only touched by the worker holding
//! that range. Locators and movers are shared between ranges.

use crate::error::TierResult;
use crate::page::{LocationId, PageSize};

/// Access class of a run of pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// Unmapped or skipped space; advances the cursor by `count << shift`
    Hole { shift: u8 },
    /// Present pages whose access bit was clear
    Idle(PageSize),
    /// Present pages whose access bit was set
    Accessed(PageSize),
}

/// One event of a walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessEvent {
    /// Move the cursor to an absolute address
    Seek(u64),
    /// `count` consecutive pages of one kind starting at the cursor
    Run { kind: RunKind, count: u32 },
}

/// Produces the access-bit stream of one range.
///
/// Events of one walk must come in address order. Each call to `walk` is
/// one round.
pub trait PageAccessSource: Send {
    fn walk(&mut self, emit: &mut dyn FnMut(AccessEvent)) -> TierResult<()>;
}

/// Resolves virtual pages to their current location
pub trait PageLocator: Send + Sync {
    /// One location per address, [`LocationId::UNKNOWN`] for pages that are
    /// not resident
    fn locate(&self, addrs: &[u64]) -> TierResult<Vec<LocationId>>;
}

/// Per-page result of a move request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PageOutcome {
    /// Page is now on this node
    Landed(LocationId),
    /// errno of the failure
    Error(i32),
}

impl std::fmt::Display for PageOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageOutcome::Landed(node) => write!(f, "{}", node),
            PageOutcome::Error(errno) => write!(f, "{}", std::io::Error::from_raw_os_error(*errno)),
        }
    }
}

/// Moves virtual pages to target locations
pub trait PageMover: Send + Sync {
    /// `targets[i]` is the destination of `addrs[i]`. One outcome per
    /// address.
    fn move_pages(&self, addrs: &[u64], targets: &[LocationId]) -> TierResult<Vec<PageOutcome>>;
}
