//! # Recursive Self-Mapping
//!
//! The last directory slot of every address space points back at the
//! directory itself. Once paging is on, this turns the top 4 MiB of the
//! virtual address space into a window onto the active hierarchy:
//!
//! ```text
//! 0xFFC0_0000 | d << 12        second-level table of directory slot d
//! 0xFFC0_0000 | d << 12 | t*4  entry t of that table
//! 0xFFFF_F000                  the page directory (slot 1023 seen through itself)
//! 0xFFFF_F000 | d*4            directory entry d
//! ```
//!
//! The walk for `0xFFC0_0000 | d << 12` resolves slot 1023 to the directory,
//! then uses the directory as if it were a table and follows entry `d`. Only
//! the tables of the *loaded* directory are reachable this way, and only if
//! their directory entry is present.

use crate::page_table::pd::{DirectoryIndex, Pde};
use crate::page_table::pt::TableIndex;
use kernel_memory_addresses::{FrameNumber, VirtualAddress, VirtualPage};

/// Directory slot reserved for the self-map.
pub const RECURSIVE_SLOT: DirectoryIndex = DirectoryIndex::new(1023);

/// Base of the 4 MiB window covered by the self-map.
pub const TABLE_WINDOW_BASE: VirtualAddress = VirtualAddress::new(0xFFC0_0000);

/// Virtual address of the active page directory.
pub const DIRECTORY_WINDOW: VirtualAddress = table_window(RECURSIVE_SLOT);

/// Entry size in bytes.
const ENTRY_SIZE: u32 = 4;

/// Virtual address of the second-level table installed in directory slot `dir`.
#[inline]
#[must_use]
pub const fn table_window(dir: DirectoryIndex) -> VirtualAddress {
    VirtualAddress::new(TABLE_WINDOW_BASE.as_u32() | (dir.as_u32() << 12))
}

/// Virtual address of entry `table` in the second-level table of slot `dir`.
#[inline]
#[must_use]
pub const fn pte_window(dir: DirectoryIndex, table: TableIndex) -> VirtualAddress {
    VirtualAddress::new(table_window(dir).as_u32() + table.as_u32() * ENTRY_SIZE)
}

/// Virtual address of directory entry `dir`.
#[inline]
#[must_use]
pub const fn pde_window(dir: DirectoryIndex) -> VirtualAddress {
    VirtualAddress::new(DIRECTORY_WINDOW.as_u32() + dir.as_u32() * ENTRY_SIZE)
}

/// Virtual address of the entry that maps `page`.
#[inline]
#[must_use]
pub const fn pte_window_of(page: VirtualPage) -> VirtualAddress {
    VirtualAddress::new(TABLE_WINDOW_BASE.as_u32() + page.number() * ENTRY_SIZE)
}

/// Whether `va` lies inside the self-mapped window.
#[inline]
#[must_use]
pub const fn is_in_window(va: VirtualAddress) -> bool {
    DirectoryIndex::from(va).as_u32() == RECURSIVE_SLOT.as_u32()
}

/// The directory entry that installs the self-map for `directory`.
#[inline]
#[must_use]
pub const fn self_map_entry(directory: FrameNumber) -> Pde {
    Pde::table(directory)
}
