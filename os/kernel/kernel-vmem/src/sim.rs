//! # Software MMU
//!
//! [`SimulatedMachine`] stands in for the CPU in host tests: sparse RAM,
//! CR0.PG, CR3 and a faithful two-level walk. Accesses through the walk
//! return [`PageFault`] instead of trapping, so a test drives the fault path
//! itself: access, hand the fault to the handler, retry.

use crate::page_table::split_indices;
use crate::{Mmu, PageFault, PhysMapper, Pde, Pte};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use core::cell::{Cell, RefCell};
use kernel_memory_addresses::{FrameNumber, PAGE_SIZE, PhysicalAddress, VirtualAddress};
use kernel_registers::cr3::Cr3;
use log::trace;

/// A 4 KiB-aligned raw frame of simulated RAM.
#[repr(C, align(4096))]
struct RamFrame([u8; PAGE_SIZE as usize]);

/// Simulated single-core 32-bit x86 machine.
///
/// RAM is allocated lazily per frame and reads as zero until written.
/// Physical accesses beyond the installed frames panic like a bus error.
pub struct SimulatedMachine {
    ram: RefCell<BTreeMap<u32, Box<RamFrame>>>,
    installed_frames: u32,
    cr3: Cell<Cr3>,
    paging: Cell<bool>,
    cr3_loads: Cell<usize>,
}

impl SimulatedMachine {
    /// A machine with `installed_frames` frames of RAM, paging off.
    #[must_use]
    pub fn new(installed_frames: u32) -> Self {
        Self {
            ram: RefCell::new(BTreeMap::new()),
            installed_frames,
            cr3: Cell::new(Cr3::new()),
            paging: Cell::new(false),
            cr3_loads: Cell::new(0),
        }
    }

    /// Current CR3 value.
    #[must_use]
    pub fn cr3(&self) -> Cr3 {
        self.cr3.get()
    }

    /// How often CR3 was written (each write flushes the TLB).
    #[must_use]
    pub fn cr3_loads(&self) -> usize {
        self.cr3_loads.get()
    }

    fn frame_ptr(&self, frame: FrameNumber) -> *mut u8 {
        assert!(
            frame.as_u32() < self.installed_frames,
            "bus error: frame {frame} is not installed"
        );
        let mut ram = self.ram.borrow_mut();
        let slot = ram
            .entry(frame.as_u32())
            .or_insert_with(|| Box::new(RamFrame([0; PAGE_SIZE as usize])));
        slot.0.as_mut_ptr()
    }

    fn phys_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        // SAFETY: the offset stays inside the 4 KiB frame.
        unsafe { self.frame_ptr(pa.frame()).add(pa.offset() as usize) }
    }

    /// Read a 32-bit word from physical memory, bypassing translation.
    #[must_use]
    pub fn read_phys_u32(&self, pa: PhysicalAddress) -> u32 {
        debug_assert!(pa.as_u32().is_multiple_of(4));
        // SAFETY: aligned, inside one frame.
        unsafe { self.phys_ptr(pa).cast::<u32>().read() }
    }

    /// Write a 32-bit word to physical memory, bypassing translation.
    pub fn write_phys_u32(&self, pa: PhysicalAddress, value: u32) {
        debug_assert!(pa.as_u32().is_multiple_of(4));
        // SAFETY: aligned, inside one frame.
        unsafe { self.phys_ptr(pa).cast::<u32>().write(value) }
    }

    /// Translate `va` the way the CPU would for a supervisor access.
    ///
    /// With paging off the address is used as is.
    ///
    /// # Errors
    /// The fault the CPU would raise: not-present if either level is missing,
    /// protection if a write hits a read-only mapping.
    pub fn translate(&self, va: VirtualAddress, write: bool) -> Result<PhysicalAddress, PageFault> {
        if !self.paging.get() {
            return Ok(PhysicalAddress::new(va.as_u32()));
        }

        let (dir, table) = split_indices(va);
        let directory = self.cr3.get().directory_phys();
        let pde = Pde::from_bits(self.read_phys_u32(directory + dir.as_u32() * 4));
        let Some(table_frame) = pde.next_table() else {
            return Err(PageFault::not_present(va, write));
        };

        let pte = Pte::from_bits(self.read_phys_u32(table_frame.base() + table.as_u32() * 4));
        let Some(frame) = pte.mapped_frame() else {
            return Err(PageFault::not_present(va, write));
        };

        if write && !(pde.writable() && pte.writable()) {
            return Err(PageFault::protection(va, write));
        }

        Ok(frame.base() + va.offset())
    }

    /// Read a 32-bit word through the active translation.
    ///
    /// # Errors
    /// The fault the access would raise.
    pub fn read_u32(&self, va: VirtualAddress) -> Result<u32, PageFault> {
        let pa = self.translate(va, false)?;
        Ok(self.read_phys_u32(pa))
    }

    /// Write a 32-bit word through the active translation.
    ///
    /// # Errors
    /// The fault the access would raise.
    pub fn write_u32(&self, va: VirtualAddress, value: u32) -> Result<(), PageFault> {
        let pa = self.translate(va, true)?;
        self.write_phys_u32(pa, value);
        Ok(())
    }
}

impl PhysMapper for SimulatedMachine {
    /// With paging on, only identity-mapped addresses can be reached.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        if self.paging.get() {
            let seen = self.translate(VirtualAddress::new(pa.as_u32()), true);
            assert_eq!(
                seen,
                Ok(pa),
                "physical access to {pa} outside the identity map"
            );
        }
        // SAFETY: the caller promises `T` matches the bytes at `pa`.
        unsafe { &mut *self.phys_ptr(pa).cast::<T>() }
    }
}

impl Mmu for SimulatedMachine {
    unsafe fn virt_to_mut<'a, T>(&self, va: VirtualAddress) -> &'a mut T {
        match self.translate(va, true) {
            // SAFETY: the caller promises `T` matches the bytes at `va`.
            Ok(pa) => unsafe { &mut *self.phys_ptr(pa).cast::<T>() },
            Err(fault) => panic!("unhandled {fault}"),
        }
    }

    unsafe fn load_cr3(&self, cr3: Cr3) {
        trace!("sim: CR3 <- {}", cr3.directory_phys());
        self.cr3.set(cr3);
        self.cr3_loads.set(self.cr3_loads.get() + 1);
    }

    unsafe fn enable_paging(&self) {
        debug_assert_ne!(self.cr3.get().into_bits(), 0, "CR3 not loaded");
        trace!("sim: CR0.PG <- 1");
        self.paging.set(true);
    }

    fn paging_enabled(&self) -> bool {
        self.paging.get()
    }
}
