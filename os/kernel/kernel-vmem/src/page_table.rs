//! # Two-Level Page Tables (32-bit x86, 4 KiB pages)

pub mod pd;
pub mod pt;

use crate::page_table::pd::DirectoryIndex;
use crate::page_table::pt::TableIndex;
use kernel_memory_addresses::VirtualAddress;

/// Entries per page directory and per second-level table.
pub const ENTRIES: usize = 1024;

/// Bytes of virtual address space covered by one directory slot (4 MiB).
pub const BYTES_PER_DIRECTORY_SLOT: u32 = 1 << 22;

/// Split a virtual address into its directory and table indices.
#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (DirectoryIndex, TableIndex) {
    (DirectoryIndex::from(va), TableIndex::from(va))
}
