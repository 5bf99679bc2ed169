//! # Kernel Memory Configuration
//!
//! Boot-time configuration shared by the frame allocator, the paging code and
//! the kernel integration. Everything here is plain `const` data so the
//! layout can be checked at compile time.
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │ Low memory, kernel image        │ identity mapped, not pooled
//! 0x0020_0000 ├─────────────────────────────────┤ frame 512
//!             │ Kernel frame pool (2 MiB)       │ identity mapped
//! 0x0040_0000 ├─────────────────────────────────┤ frame 1024 (shared region ends)
//!             │ Process frame pool (28 MiB)     │
//! 0x00F0_0000 │   ├ memory hole (1 MiB)         │ marked inaccessible
//! 0x0100_0000 │   ┘                             │
//! 0x0200_0000 └─────────────────────────────────┘ frame 8192
//! ```
//!
//! The first 4 MiB are identity mapped in every address space (the *shared
//! region*). The kernel pool lies entirely inside it, which is why frames
//! handed out by that pool can still be initialized through their physical
//! address after paging has been turned on.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
