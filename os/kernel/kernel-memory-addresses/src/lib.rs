//! # Physical and Virtual Address Types (32-bit x86)
//!
//! Strongly typed wrappers for raw addresses, physical frame numbers and
//! virtual page numbers used by the frame allocator, the page tables and the
//! VM pools.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address in physical memory. |
//! | [`FrameNumber`] | A physical 4 KiB frame, i.e. `address >> 12`. |
//! | [`VirtualAddress`] | A byte address in a (possibly translated) address space. |
//! | [`VirtualPage`] | A virtual 4 KiB page, i.e. `address >> 12`. |
//!
//! The machine only knows 4 KiB pages; there is no large-page support, so the
//! page size is a plain constant ([`PAGE_SIZE`]) instead of a type parameter.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0800_0500);
//! assert_eq!(va.page().base().as_u32(), 0x0800_0000);
//! assert_eq!(va.offset(), 0x500);
//!
//! let frame = FrameNumber::new(1024);
//! assert_eq!(frame.base(), PhysicalAddress::new(0x0040_0000));
//! assert_eq!(PhysicalAddress::new(0x0040_0FFF).frame(), frame);
//! ```
//!
//! ## Design Notes
//!
//! - All types are `#[repr(transparent)]` over `u32` and implement `Copy`,
//!   `Eq`, `Ord` and `Hash`.
//! - Address arithmetic is `const fn`. Additions wrap like the hardware does;
//!   use the `checked_*` variants where overflow is a logic error.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod frame_number;
mod physical_address;
mod virtual_address;
mod virtual_page;

pub use frame_number::FrameNumber;
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

/// log2 of the page (and frame) size.
pub const PAGE_SHIFT: u32 = 12;

/// Size of a page (and of a physical frame) in bytes.
pub const PAGE_SIZE: u32 = 1 << PAGE_SHIFT;

/// Mask of the in-page offset bits.
pub const PAGE_OFFSET_MASK: u32 = PAGE_SIZE - 1;

/// Number of whole pages needed to hold `bytes` bytes.
///
/// ```rust
/// # use kernel_memory_addresses::pages_for;
/// assert_eq!(pages_for(0), 0);
/// assert_eq!(pages_for(100), 1);
/// assert_eq!(pages_for(4096), 1);
/// assert_eq!(pages_for(5000), 2);
/// ```
#[inline]
#[must_use]
pub const fn pages_for(bytes: u32) -> u32 {
    bytes.div_ceil(PAGE_SIZE)
}
