//! # Kernel-Wide Memory Manager and Page-Fault Trap
//!
//! The running kernel has exactly one [`KernelMemory`]. It is created by
//! [`install`] and afterwards only touched under its lock, either by kernel
//! code or by the page-fault trap.
//!
//! The trap never waits for the lock: a fault while the lock is held means
//! the memory manager itself faulted, which cannot be resolved.

use crate::memory::{BootError, KernelMemory};
use crate::page_fault;
use core::arch::{asm, naked_asm};
use kernel_alloc::phys_mapper::IdentityMmu;
use kernel_info::memory::MemoryLayout;
use kernel_qemu::QemuLogger;
use kernel_registers::LoadRegisterUnsafe;
use kernel_registers::cr2::Cr2;
use log::{LevelFilter, debug, error};
use spin::{Mutex, Once};

pub type Memory = Mutex<KernelMemory<IdentityMmu>>;

static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);
static MEMORY: Once<Memory> = Once::new();

/// Install the logger and bring up memory management. Later calls return
/// the instance created by the first successful one.
///
/// # Safety
/// See [`KernelMemory::boot`]. Must run on the boot CPU before interrupts
/// are enabled.
///
/// # Errors
/// The [`BootError`] of the first attempt; memory management is not
/// available afterwards.
pub unsafe fn install(layout: &MemoryLayout) -> Result<&'static Memory, BootError> {
    if LOGGER.init().is_err() {
        debug!("memory: logger already installed");
    }
    MEMORY.try_call_once(|| unsafe { KernelMemory::boot(IdentityMmu, layout) }.map(Mutex::new))
}

/// The installed memory manager, if [`install`] succeeded.
#[must_use]
pub fn memory() -> Option<&'static Memory> {
    MEMORY.get()
}

/// IDT entry for vector 14.
///
/// Saves the general-purpose registers, hands the CPU's error code to
/// [`page_fault_trap`], drops the error code and returns to the faulting
/// instruction.
#[unsafe(naked)]
pub extern "C" fn page_fault_entry() {
    naked_asm!(
        "pushad",
        "cld",
        // pushad stored 8 registers above the error code.
        "mov eax, [esp + 32]",
        "push eax",
        "call {trap}",
        "add esp, 4",
        "popad",
        "add esp, 4",
        "iretd",
        trap = sym page_fault_trap,
    )
}

/// Resolve a page fault or halt.
extern "C" fn page_fault_trap(error_code: u32) {
    // SAFETY: Reading CR2 inside the #PF handler has no side effects.
    let address = unsafe { Cr2::load_unsafe() }.fault_address();

    let Some(memory) = MEMORY.get() else {
        error!("page fault at {address} before memory management is up");
        halt();
    };
    let Some(mut memory) = memory.try_lock() else {
        error!("page fault at {address} inside the memory manager");
        halt();
    };

    if page_fault::dispatch(&mut memory, address, error_code).is_err() {
        halt();
    }
}

fn halt() -> ! {
    loop {
        // SAFETY: Stops this CPU for good.
        unsafe { asm!("cli", "hlt", options(nomem, nostack)) };
    }
}
