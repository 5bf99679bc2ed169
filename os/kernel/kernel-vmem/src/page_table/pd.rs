//! # Page Directory (top level)
//!
//! - [`DirectoryIndex`]: index type for virtual-address bits `[31:22]`.
//! - [`Pde`]: a directory entry pointing to a second-level table.
//! - [`PageDirectory`]: a 4 KiB-aligned array of 1024 entries.
//!
//! Large (4 MiB) pages are not used, so `PS` is always 0 and every present
//! entry names the frame of a second-level table.

use crate::page_table::ENTRIES;
use bitfield_struct::bitfield;
use kernel_memory_addresses::{FrameNumber, VirtualAddress};

/// Index into the page directory (derived from VA bits `[31:22]`).
///
/// Range is `0..1024` (checked in debug builds).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DirectoryIndex(u16);

/// Page-directory entry.
///
/// - Bits 12..31 hold the frame of the second-level table.
/// - A non-present entry is ignored by the CPU apart from bit 0; the other
///   bits are free for software, and the kernel keeps `writable` set on
///   unused slots.
#[doc(alias = "PDE")]
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Pde {
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
    /// Bit 6: ignored for table pointers.
    #[bits(1)]
    __ignored6: u8,
    /// PS (bit 7): **must be 0**, no 4 MiB pages.
    #[bits(1)]
    __ps_must_be_0: u8,
    /// Bit 8: ignored for table pointers.
    #[bits(1)]
    __ignored8: u8,
    /// OS-available (bits 9..11).
    #[bits(3)]
    pub os_available: u8,
    /// Frame of the second-level table (bits 12..31).
    #[bits(20)]
    table_frame: u32,
}

/// The page directory: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [Pde; ENTRIES],
}

const _: () = assert!(size_of::<PageDirectory>() == 4096);

impl DirectoryIndex {
    /// Extract bits `[31:22]` of a virtual address.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new((va.as_u32() >> 22) as u16)
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

    /// First virtual address covered by this slot.
    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new((self.0 as u32) << 22)
    }
}

impl Pde {
    /// Present, writable, supervisor entry pointing at the table in `frame`.
    #[inline]
    #[must_use]
    pub const fn table(frame: FrameNumber) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_table_frame(frame.as_u32())
    }

    /// Unused slot: not present, supervisor, writable.
    #[inline]
    #[must_use]
    pub const fn absent() -> Self {
        Self::new().with_writable(true)
    }

    /// Frame stored in the entry, present or not.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> FrameNumber {
        FrameNumber::new(self.table_frame())
    }

    /// If present, the frame of the second-level table.
    #[inline]
    #[must_use]
    pub const fn next_table(self) -> Option<FrameNumber> {
        if self.present() {
            Some(self.frame())
        } else {
            None
        }
    }
}

impl PageDirectory {
    /// Create a fully zeroed directory (all entries non-present).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [Pde::new(); ENTRIES],
        }
    }

    /// Read the entry at `i`.
    ///
    /// Plain load; does not imply any TLB synchronization.
    #[inline]
    #[must_use]
    pub const fn get(&self, i: DirectoryIndex) -> Pde {
        self.entries[i.as_usize()]
    }

    /// Write the entry at `i`.
    ///
    /// Caller must handle any required TLB invalidation when changing active mappings.
    #[inline]
    pub const fn set(&mut self, i: DirectoryIndex, e: Pde) {
        self.entries[i.as_usize()] = e;
    }

    /// Overwrite every entry with `e`.
    #[inline]
    pub fn fill(&mut self, e: Pde) {
        self.entries.fill(e);
    }

    /// Derive the directory index from a virtual address.
    #[inline]
    #[must_use]
    pub const fn index_of(va: VirtualAddress) -> DirectoryIndex {
        DirectoryIndex::from(va)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn table_entry_encoding() {
        let e = Pde::table(FrameNumber::new(0x401));
        assert_eq!(e.into_bits(), 0x0040_1003);
        assert_eq!(e.next_table(), Some(FrameNumber::new(0x401)));
    }

    #[test]
    fn absent_entry_is_writable_but_not_present() {
        let e = Pde::absent();
        assert_eq!(e.into_bits(), 2);
        assert_eq!(e.next_table(), None);
    }

    #[test]
    fn index_covers_4mib() {
        assert_eq!(DirectoryIndex::from(VirtualAddress::new(0x003F_FFFF)).as_usize(), 0);
        assert_eq!(DirectoryIndex::from(VirtualAddress::new(0x0040_0000)).as_usize(), 1);
        assert_eq!(DirectoryIndex::new(32).base(), VirtualAddress::new(0x0800_0000));
    }
}
