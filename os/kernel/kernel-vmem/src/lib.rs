//! # Virtual Memory Support (32-bit x86, two-level paging)
//!
//! Typed page-directory and page-table structures plus the seams the paging
//! code needs to talk to hardware.
//!
//! ## What you get
//! - [`page_table::pd::PageDirectory`] / [`page_table::pt::SecondLevelTable`]:
//!   4 KiB-aligned arrays of 1024 typed entries ([`Pde`], [`Pte`]).
//! - [`page_table::split_indices`] and the typed [`DirectoryIndex`] /
//!   [`TableIndex`].
//! - [`recursive`]: virtual addresses of the self-mapped window.
//! - [`PageFault`] / [`PageFaultError`]: the record the trap layer produces.
//! - [`PhysMapper`] and [`Mmu`]: how the paging code reaches physical memory,
//!   the active translation and the control registers.
//! - `sim` (feature `sim`): a software MMU for host tests.
//!
//! ## 32-bit Virtual Address → Physical Address Walk
//!
//! ```text
//! | 31‒22     | 21‒12 | 11‒0   |
//! | Directory | Table | Offset |
//! ```
//!
//! CR3 names the frame of the page directory. Directory entry `va[31:22]`
//! names a second-level table, whose entry `va[21:12]` names the frame that
//! backs the page. Each table has 1024 entries of 4 bytes and fills exactly
//! one frame.
//!
//! ```text
//!  CR3 → Page Directory → Second-Level Table → Physical Page
//!              │                  │
//!              │                  └───► PTE → maps 4 KiB page
//!              └──────────────────────► PDE → points to a table
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

#[cfg(any(test, feature = "sim"))]
extern crate alloc;

pub mod page_fault;
pub mod page_table;
pub mod recursive;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use crate::page_fault::{PageFault, PageFaultError};
pub use crate::page_table::pd::{DirectoryIndex, PageDirectory, Pde};
pub use crate::page_table::pt::{Pte, SecondLevelTable, TableIndex};
pub use crate::page_table::split_indices;
use kernel_memory_addresses::{FrameNumber, PhysicalAddress, VirtualAddress};
use kernel_registers::cr3::Cr3;

/// Converts physical addresses to *temporarily* usable references in the
/// current address space.
///
/// Before paging is enabled every physical address is directly usable. After
/// that, only frames inside the identity-mapped shared region are.
///
/// # Safety
/// - You must ensure `pa` is mapped as writable in the current page tables
///   for `&mut T`.
/// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
///   for `'a`.
/// - Type `T` must match the bytes at `pa` (no aliasing UB).
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// Borrow the page directory stored in `frame`.
    ///
    /// # Safety
    /// `frame` must hold a page directory and be reachable through this mapper.
    #[inline]
    unsafe fn directory_mut<'a>(&self, frame: FrameNumber) -> &'a mut PageDirectory {
        unsafe { self.phys_to_mut::<PageDirectory>(frame.base()) }
    }

    /// Borrow the second-level table stored in `frame`.
    ///
    /// # Safety
    /// `frame` must hold a second-level table and be reachable through this mapper.
    #[inline]
    unsafe fn table_mut<'a>(&self, frame: FrameNumber) -> &'a mut SecondLevelTable {
        unsafe { self.phys_to_mut::<SecondLevelTable>(frame.base()) }
    }
}

/// The memory-management unit as seen by the paging code.
///
/// Implemented by the bare-metal kernel (raw pointers and control-register
/// writes) and by [`sim::SimulatedMachine`] for tests.
pub trait Mmu: PhysMapper {
    /// Access memory through the active translation.
    ///
    /// # Safety
    /// `va` must be mapped in the active address space and `T` must match
    /// the bytes there.
    unsafe fn virt_to_mut<'a, T>(&self, va: VirtualAddress) -> &'a mut T;

    /// Write CR3. This also discards every cached translation.
    ///
    /// # Safety
    /// `cr3` must name a valid page directory that maps the running code.
    unsafe fn load_cr3(&self, cr3: Cr3);

    /// Set CR0.PG.
    ///
    /// # Safety
    /// CR3 must already hold a valid page directory.
    unsafe fn enable_paging(&self);

    /// Whether CR0.PG is set.
    fn paging_enabled(&self) -> bool;
}
