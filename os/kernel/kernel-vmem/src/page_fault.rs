//! # Page-Fault Records

use bitfield_struct::bitfield;
use kernel_memory_addresses::VirtualAddress;

/// Page-fault error code layout (32-bit x86).
///
/// Each bit describes the condition that caused the page fault.
/// Reference: Intel SDM Vol. 3A, §6.15 “Page-Fault Exception (#PF)”.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch (execute access).
    pub instruction_fetch: bool, // bit 4

    /// 1 = protection-key violation (if CR4.PKE=1).
    pub protection_key: bool, // bit 5

    /// 1 = shadow stack access (if CET-SS enabled).
    pub shadow_stack: bool, // bit 6

    #[bits(25)]
    __: u32, // reserved / ignored bits
}

impl PageFaultError {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "Non-present page (page not mapped)"
        } else if self.instruction_fetch() {
            if self.user() {
                "User-mode instruction fetch on protected page"
            } else {
                "Kernel instruction fetch on protected page"
            }
        } else if self.write() {
            "Write access to protected page"
        } else {
            "Read access to protected page"
        }
    }
}

/// What the trap layer hands to the fault handler: the faulting address
/// (CR2) and the error code pushed by the CPU.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("page fault at {address} (error {:#x}): {}", .error.into_bits(), .error.explain())]
pub struct PageFault {
    pub address: VirtualAddress,
    pub error: PageFaultError,
}

impl PageFault {
    #[must_use]
    pub const fn new(address: VirtualAddress, error: PageFaultError) -> Self {
        Self { address, error }
    }

    /// A supervisor fault on a non-present page.
    #[must_use]
    pub const fn not_present(address: VirtualAddress, write: bool) -> Self {
        Self::new(address, PageFaultError::new().with_write(write))
    }

    /// A supervisor fault on a present page whose permissions forbid the access.
    #[must_use]
    pub const fn protection(address: VirtualAddress, write: bool) -> Self {
        Self::new(
            address,
            PageFaultError::new().with_present(true).with_write(write),
        )
    }
}
