//! # Typed 32-bit x86 Control Registers
//!
//! Only the registers the paging code touches are modelled: [`cr0::Cr0`]
//! (paging switch), [`cr2::Cr2`] (faulting address) and [`cr3::Cr3`]
//! (page-directory base). Register access is `unsafe` and requires ring 0;
//! the inline assembly is only compiled with the `asm` feature on
//! `target_arch = "x86"`, so the bit layouts stay usable in host tests.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr0")]
pub mod cr0;

#[cfg(feature = "cr2")]
pub mod cr2;

#[cfg(feature = "cr3")]
pub mod cr3;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}
