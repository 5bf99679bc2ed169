//! # Second-Level Page Table
//!
//! - [`TableIndex`]: index type for VA bits `[21:12]`.
//! - [`Pte`]: a leaf entry mapping one 4 KiB page.
//! - [`SecondLevelTable`]: a 4 KiB-aligned array of 1024 PTEs.
//!
//! After modifying active mappings, the caller must perform any required
//! TLB maintenance.

use crate::page_table::ENTRIES;
use bitfield_struct::bitfield;
use kernel_memory_addresses::{FrameNumber, VirtualAddress};

/// Index into a second-level table (derived from VA bits `[21:12]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

/// Page-table entry.
#[doc(alias = "PTE")]
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Pte {
    /// Present (bit 0).
    pub present: bool,
    /// Writable (bit 1).
    pub writable: bool,
    /// User (bit 2).
    pub user: bool,
    /// Write-Through (bit 3).
    pub write_through: bool,
    /// Cache Disable (bit 4).
    pub cache_disable: bool,
    /// Accessed (bit 5).
    pub accessed: bool,
    /// Dirty (bit 6): set by the CPU on first write.
    pub dirty: bool,
    /// PAT (bit 7).
    pub pat: bool,
    /// Global (bit 8).
    pub global: bool,
    /// OS-available (bits 9..11).
    #[bits(3)]
    pub os_available: u8,
    /// Frame backing the page (bits 12..31).
    #[bits(20)]
    page_frame: u32,
}

/// Second-level table: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct SecondLevelTable {
    entries: [Pte; ENTRIES],
}

const _: () = assert!(size_of::<SecondLevelTable>() == 4096);

impl TableIndex {
    /// Extract bits `[21:12]` of a virtual address.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new(((va.as_u32() >> 12) & 0x3FF) as u16)
    }

    /// Construct from a raw `u16`.
    ///
    /// ### Debug assertions
    /// - Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!(v < 1024);
        Self(v)
    }

    /// Return the index as `usize` for table access.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0 as u32
    }
}

impl Pte {
    /// Present, writable, supervisor leaf mapping `frame`.
    #[inline]
    #[must_use]
    pub const fn leaf(frame: FrameNumber) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_page_frame(frame.as_u32())
    }

    /// Entry of a freshly created table: not present, user, read-only.
    #[inline]
    #[must_use]
    pub const fn absent_user() -> Self {
        Self::new().with_user(true)
    }

    /// Entry of an unmapped page: not present, supervisor, writable.
    #[inline]
    #[must_use]
    pub const fn absent() -> Self {
        Self::new().with_writable(true)
    }

    /// Frame stored in the entry, present or not.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> FrameNumber {
        FrameNumber::new(self.page_frame())
    }

    /// If present, the frame backing the page.
    #[inline]
    #[must_use]
    pub const fn mapped_frame(self) -> Option<FrameNumber> {
        if self.present() {
            Some(self.frame())
        } else {
            None
        }
    }
}

impl SecondLevelTable {
    /// Create a fully zeroed table (all entries non-present).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [Pte::new(); ENTRIES],
        }
    }

    /// Read the entry at `i`.
    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> Pte {
        self.entries[i.as_usize()]
    }

    /// Write the entry at `i`.
    ///
    /// Caller must handle any required TLB invalidation when changing active mappings.
    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: Pte) {
        self.entries[i.as_usize()] = e;
    }

    /// Overwrite every entry with `e`.
    #[inline]
    pub fn fill(&mut self, e: Pte) {
        self.entries.fill(e);
    }

    /// Derive the table index from a virtual address.
    #[inline]
    #[must_use]
    pub const fn index_of(va: VirtualAddress) -> TableIndex {
        TableIndex::from(va)
    }
}
