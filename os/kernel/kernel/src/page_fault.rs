//! # Page-Fault Dispatch
//!
//! Turns the raw trap inputs (CR2 and the CPU's error code) into a
//! [`PageFault`] and lets the paging system resolve it. A fault that cannot
//! be resolved ends the faulting context; the caller halts.

use crate::memory::KernelMemory;
use kernel_alloc::paging::{FaultResolution, PagingError};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{Mmu, PageFault, PageFaultError};
use log::{error, trace};

/// Resolve the fault described by `address` and `error_code`.
///
/// # Errors
/// [`FatalFault`] if the paging system refused the fault; the access must
/// not be retried.
pub fn dispatch<M: Mmu>(
    memory: &mut KernelMemory<M>,
    address: VirtualAddress,
    error_code: u32,
) -> Result<FaultResolution, FatalFault> {
    let fault = PageFault::new(address, PageFaultError::from_bits(error_code));
    trace!("{fault}");

    memory
        .paging_mut()
        .handle_fault(fault)
        .map_err(|cause| {
            error!("unresolvable {fault}: {cause}");
            FatalFault { fault, cause }
        })
}

/// A page fault the kernel could not resolve.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("{fault}: {cause}")]
pub struct FatalFault {
    pub fault: PageFault,
    #[source]
    pub cause: PagingError,
}
