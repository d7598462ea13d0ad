//! Page sizes and location ids

use serde::{Deserialize, Serialize};

/// 4 KiB base page shift
pub const BASE_PAGE_SHIFT: u8 = 12;

/// 2 MiB huge page shift
pub const HUGE_PAGE_SHIFT: u8 = 21;

/// Page granularities tracked by a range, one ledger each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSize {
    /// 4K pages (PTE level)
    Base,
    /// 2M pages (PMD level)
    Huge,
}

impl PageSize {
    pub const ALL: [PageSize; 2] = [PageSize::Base, PageSize::Huge];

    pub fn shift(self) -> u8 {
        match self {
            PageSize::Base => BASE_PAGE_SHIFT,
            PageSize::Huge => HUGE_PAGE_SHIFT,
        }
    }

    pub fn bytes(self) -> u64 {
        1u64 << self.shift()
    }

    /// Slot in per-size arrays
    pub fn index(self) -> usize {
        match self {
            PageSize::Base => 0,
            PageSize::Huge => 1,
        }
    }

    pub fn from_shift(shift: u8) -> Option<Self> {
        match shift {
            BASE_PAGE_SHIFT => Some(PageSize::Base),
            HUGE_PAGE_SHIFT => Some(PageSize::Huge),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PageSize::Base => "4K",
            PageSize::Huge => "2M",
        }
    }
}

impl std::fmt::Display for PageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Location of a physical page, normally a NUMA node id.
///
/// Stored as one byte per ledger entry. [`LocationId::UNKNOWN`] marks pages
/// the locate pass could not resolve (or has not visited yet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(u8);

impl LocationId {
    pub const UNKNOWN: LocationId = LocationId(0xFF);

    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }

    pub fn is_known(self) -> bool {
        self != Self::UNKNOWN
    }
}

impl Default for LocationId {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl std::fmt::Display for LocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_known() {
            write!(f, "node{}", self.0)
        } else {
            f.write_str("unknown")
        }
    }
}

/// Truncating percentage, 0 when the whole is empty
pub fn percent(part: u64, whole: u64) -> u64 {
    if whole == 0 {
        return 0;
    }
    ((part as u128 * 100) / whole as u128) as u64
}
