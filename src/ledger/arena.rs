//! Segment arena backing the ledger entries
//!
//! Entries are appended into fixed 64 KiB segments. A segment is never
//! reallocated after creation, so `(segment, offset)` handles stay valid until
//! [`SegmentArena::release_all`]. There is no per-entry free.

use super::entry::Entry;
use crate::error::{TierError, TierResult};

/// Size of one arena segment
pub const SEGMENT_BYTES: usize = 0x10000;

/// Entries that fit in one segment
pub const SEGMENT_ENTRIES: usize = SEGMENT_BYTES / std::mem::size_of::<Entry>();

/// Stable handle to an entry slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHandle {
    pub segment: u32,
    pub offset: u32,
}

/// Fixed-size segment pool
#[derive(Debug, Default)]
pub struct SegmentArena {
    segments: Vec<Vec<Entry>>,
    /// Optional hard cap on the number of segments
    limit: Option<usize>,
}

impl SegmentArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arena that refuses to grow past `limit` segments
    pub fn with_limit(limit: usize) -> Self {
        Self {
            segments: Vec::new(),
            limit: Some(limit),
        }
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Bytes reserved by all segments
    pub fn reserved_bytes(&self) -> usize {
        self.segments.len() * SEGMENT_BYTES
    }

    /// Whether the newest segment can take another entry
    pub fn has_room(&self) -> bool {
        self.segments
            .last()
            .map(|seg| seg.len() < SEGMENT_ENTRIES)
            .unwrap_or(false)
    }

    /// Handle the next `push` would return, allocating a segment if needed
    pub fn next_slot(&mut self) -> TierResult<EntryHandle> {
        if !self.has_room() {
            self.grow()?;
        }
        let segment = self.segments.len() - 1;
        Ok(EntryHandle {
            segment: segment as u32,
            offset: self.segments[segment].len() as u32,
        })
    }

    /// Append into the newest segment. Caller must have checked
    /// [`has_room`](Self::has_room) or called [`next_slot`](Self::next_slot).
    pub fn push(&mut self, entry: Entry) -> EntryHandle {
        let segment = self.segments.len() - 1;
        let seg = &mut self.segments[segment];
        debug_assert!(seg.len() < SEGMENT_ENTRIES);
        seg.push(entry);
        EntryHandle {
            segment: segment as u32,
            offset: (seg.len() - 1) as u32,
        }
    }

    pub fn slice(&self, segment: u32, offset: u32, len: u32) -> &[Entry] {
        let start = offset as usize;
        &self.segments[segment as usize][start..start + len as usize]
    }

    pub fn slice_mut(&mut self, segment: u32, offset: u32, len: u32) -> &mut [Entry] {
        let start = offset as usize;
        &mut self.segments[segment as usize][start..start + len as usize]
    }

    /// Drop every segment
    pub fn release_all(&mut self) {
        self.segments = Vec::new();
    }

    fn grow(&mut self) -> TierResult<()> {
        if let Some(limit) = self.limit {
            if self.segments.len() >= limit {
                return Err(TierError::ArenaExhausted { limit });
            }
        }
        let mut seg = Vec::new();
        seg.try_reserve_exact(SEGMENT_ENTRIES)?;
        self.segments.try_reserve(1)?;
        self.segments.push(seg);
        log::trace!("[Ledger] arena grew to {} segments", self.segments.len());
        Ok(())
    }
}
