//! # Identity-Mapped MMU
//!
//! The kernel runs in the shared region, which every page table maps
//! one-to-one. Physical addresses inside it are usable as pointers both
//! before and after paging is enabled; everything else is reached through
//! the recursive window.
//!
//! ```text
//! phys_to_mut(pa) ──▶ *(pa as *mut T)          (pa < shared_size)
//! virt_to_mut(va) ──▶ *(va as *mut T)          (va mapped in CR3)
//! load_cr3        ──▶ mov cr3, ...
//! enable_paging   ──▶ CR0.PG = 1
//! ```

use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;
#[cfg(target_arch = "x86")]
use {kernel_memory_addresses::VirtualAddress, kernel_registers::cr3::Cr3, kernel_vmem::Mmu};

/// [`Mmu`](kernel_vmem::Mmu) for the bare-metal kernel with an identity-mapped shared region.
#[derive(Copy, Clone, Debug, Default)]
pub struct IdentityMmu;

impl PhysMapper for IdentityMmu {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let ptr = pa.as_u32() as usize as *mut T;
        // SAFETY: Caller guarantees `pa` is identity mapped (or paging is off).
        unsafe { &mut *ptr }
    }
}

#[cfg(target_arch = "x86")]
impl Mmu for IdentityMmu {
    unsafe fn virt_to_mut<'a, T>(&self, va: VirtualAddress) -> &'a mut T {
        // SAFETY: Caller guarantees `va` is mapped in the active page table.
        unsafe { &mut *va.as_mut_ptr::<T>() }
    }

    unsafe fn load_cr3(&self, cr3: Cr3) {
        use kernel_registers::StoreRegisterUnsafe;
        // SAFETY: Caller guarantees `cr3` names a directory mapping this code.
        unsafe { cr3.store_unsafe() }
    }

    unsafe fn enable_paging(&self) {
        use kernel_registers::cr0::Cr0;
        use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
        // SAFETY: Caller guarantees CR3 is valid.
        unsafe {
            let cr0 = Cr0::load_unsafe();
            cr0.with_pg_paging(true).store_unsafe();
        }
    }

    fn paging_enabled(&self) -> bool {
        use kernel_registers::LoadRegisterUnsafe;
        use kernel_registers::cr0::Cr0;
        // SAFETY: Reading CR0 has no side effects.
        unsafe { Cr0::load_unsafe() }.pg_paging()
    }
}

