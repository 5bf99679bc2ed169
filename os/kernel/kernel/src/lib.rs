//! # Kernel Memory Bring-Up
//!
//! Wires the frame pools, the paging system and VM pools into the boot
//! sequence and the page-fault trap of a 32-bit x86 kernel.
//!
//! ```text
//! boot ──▶ KernelMemory::boot ──▶ paging on
//!                                   │
//! #PF ──▶ page_fault_entry ──▶ page_fault_trap ──▶ page_fault::dispatch
//!                                                      │
//!                                                      └──▶ PagingSystem::handle_fault
//! ```
//!
//! Everything but `global` (x86 only) is hardware independent and tested against
//! `kernel_vmem::sim::SimulatedMachine`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(target_arch = "x86")]
pub mod global;
pub mod memory;
pub mod page_fault;
