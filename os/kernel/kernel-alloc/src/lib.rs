//! # Kernel Memory Allocation and Demand Paging
//!
//! Physical frame allocation, two-level demand paging and virtual-memory
//! pools for a 32-bit x86 kernel.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    VM Pools                         │
//! │    • contiguous virtual regions, lazily backed      │
//! │    • legitimacy checks for the fault handler        │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ register_pool / free_page
//! ┌─────────────────▼───────────────────────────────────┐
//! │               Paging System                         │
//! │    • one page directory per address space           │
//! │    • recursive self-map in slot 1023                │
//! │    • demand paging on not-present faults            │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ get_frames / release
//! ┌─────────────────▼───────────────────────────────────┐
//! │            Frame Pool Registry                      │
//! │    • one frame pool per physical region             │
//! │    • 2-bit state per frame, bitmap in one frame     │
//! │    • release without knowing the owning pool        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Frame pools ([`frame_pool`], [`registry`])
//!
//! A [`FramePool`](frame_pool::FramePool) hands out contiguous runs of
//! frames from one physical region. Each frame has a 2-bit state (free,
//! head of a run, allocated) packed four to a byte into a single bitmap
//! frame, so a pool covers at most 16384 frames (64 MiB). The
//! [`FramePoolRegistry`](registry::FramePoolRegistry) owns all pools, keeps
//! them sorted by base frame and routes a release to the pool that owns the
//! frame.
//!
//! ### Paging ([`paging`])
//!
//! [`PagingSystem`](paging::PagingSystem) holds what the hardware treats as
//! global state: the frame pools, the paging configuration, every page
//! table and which one is loaded. Page tables map the shared region
//! identity through directory slot 0, point slot 1023 back at the directory
//! and fill everything else on demand from
//! [`handle_fault`](paging::PagingSystem::handle_fault).
//!
//! ### VM pools ([`vm_pool`])
//!
//! A [`VmPool`](vm_pool::VmPool) carves regions out of a virtual range. It
//! never maps anything itself; pages appear when first touched and are
//! returned to their frame pool when the region is released.
//!
//! ### Hardware access ([`phys_mapper`])
//!
//! [`IdentityMmu`](phys_mapper::IdentityMmu) is the bare-metal implementation
//! of the [`Mmu`](kernel_vmem::Mmu) seam. Host tests use
//! `kernel_vmem::sim::SimulatedMachine` instead.
//!
//! ## Concurrency
//!
//! Nothing here locks. All mutation happens at boot or in the serialized
//! fault path; callers that share these objects wrap them in a lock.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod frame_pool;
pub mod paging;
pub mod phys_mapper;
pub mod registry;
pub mod vm_pool;
