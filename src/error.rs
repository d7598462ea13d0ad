//! Error types
//!
//! Only a handful of conditions are real faults. Misaligned addresses,
//! duplicate appends and update-mode misses are reported through
//! [`RecordStatus`](crate::ledger::RecordStatus) instead, so one bad sample
//! never aborts tracking of the rest.

use std::collections::TryReserveError;

/// Result alias used throughout the crate
pub type TierResult<T> = Result<T, TierError>;

/// memtier errors
#[derive(Debug, thiserror::Error)]
pub enum TierError {
    #[error("arena exhausted: segment limit {limit} reached")]
    ArenaExhausted { limit: usize },

    #[error("arena allocation failed: {0}")]
    Alloc(#[from] TryReserveError),

    #[error("unsupported page shift {0} (expected 12 or 21)")]
    InvalidPageShift(u8),

    #[error("page granularity is locked at shift {current}, cannot switch to {requested}")]
    GranularityLocked { current: u8, requested: u8 },

    #[error("cursor was issued for an earlier pass over this ledger")]
    StaleCursor,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("page access source failed: {0}")]
    Source(String),

    #[error("page locate failed: {0}")]
    Locate(String),

    #[error("page move failed: {0}")]
    Move(String),

    #[error("worker pool error: {0}")]
    Pool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
