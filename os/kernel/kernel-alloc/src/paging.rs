//! # Demand-Paged Address Spaces
//!
//! [`PagingSystem`] owns the machine-wide paging state: the [`Mmu`], the
//! frame pools, the [`PagingConfig`] given at init, every [`PageTable`] and
//! which of them is loaded in CR3.
//!
//! ## Page table layout
//!
//! | Directory slot | Content |
//! |----------------|---------|
//! | 0 | table identity-mapping the first `shared_size` bytes, present + rw |
//! | 1..=1022 | not present, supervisor, rw; filled on demand |
//! | 1023 | the directory itself (see [`kernel_vmem::recursive`]) |
//!
//! ## Frame sources
//!
//! - Directory and shared table: the process pool while paging is off, the
//!   kernel pool afterwards. The kernel pool lies inside the shared region,
//!   so its frames can still be written through their physical address.
//! - Second-level tables created on a fault: the process pool. They are
//!   only ever touched through the recursive window.
//! - Pages: the frame pool of the VM pool that claims the address, or the
//!   process pool when the table has no VM pools.
//!
//! ## Page life cycle
//!
//! ```text
//! Unmapped ──fault, address legitimate──▶ Mapped ──free_page──▶ Unmapped
//! ```

use crate::frame_pool::FramePoolError;
use crate::registry::{FramePoolRegistry, PoolId};
use crate::vm_pool::VmPoolWindow;
use alloc::vec::Vec;
use kernel_memory_addresses::{
    FrameNumber, PAGE_SIZE, PhysicalAddress, VirtualAddress, VirtualPage, pages_for,
};
use kernel_registers::cr3::Cr3;
use kernel_vmem::page_table::BYTES_PER_DIRECTORY_SLOT;
use kernel_vmem::recursive::{self, RECURSIVE_SLOT};
use kernel_vmem::{
    DirectoryIndex, Mmu, PageFault, Pde, Pte, SecondLevelTable, TableIndex, split_indices,
};
use log::{debug, error, info, warn};

/// Directory slot holding the shared identity map.
const SHARED_SLOT: DirectoryIndex = DirectoryIndex::new(0);

/// One-time configuration of the paging system.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PagingConfig {
    /// Pool for page directories once paging is on.
    pub kernel_pool: PoolId,
    /// Pool for second-level tables and, by default, for pages.
    pub process_pool: PoolId,
    /// Bytes identity mapped through directory slot 0.
    pub shared_size: u32,
}

/// Handle of a page table owned by a [`PagingSystem`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct PageTableId(usize);

/// One address space: its directory frame and the VM pools registered
/// with it, in registration order.
#[derive(Debug)]
pub struct PageTable {
    directory: FrameNumber,
    vm_pools: Vec<VmPoolWindow>,
}

impl PageTable {
    #[inline]
    #[must_use]
    pub const fn directory(&self) -> FrameNumber {
        self.directory
    }

    /// The CR3 value that activates this table.
    #[inline]
    #[must_use]
    pub const fn cr3(&self) -> Cr3 {
        Cr3::from_directory(self.directory)
    }

    #[inline]
    #[must_use]
    pub fn vm_pools(&self) -> &[VmPoolWindow] {
        &self.vm_pools
    }

    /// The first registered VM pool that claims `address`.
    #[must_use]
    pub fn claiming_pool(&self, address: VirtualAddress) -> Option<&VmPoolWindow> {
        self.vm_pools.iter().find(|w| w.is_legitimate(address))
    }
}

/// Outcome of a resolved page fault.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FaultResolution {
    /// The page that is now mapped.
    pub page: VirtualPage,
    /// The frame backing it.
    pub frame: FrameNumber,
    /// Frame of the second-level table created on the way, if any.
    pub new_table: Option<FrameNumber>,
}

/// Machine-wide paging state.
pub struct PagingSystem<M: Mmu> {
    mmu: M,
    frames: FramePoolRegistry,
    config: PagingConfig,
    tables: Vec<PageTable>,
    current: Option<PageTableId>,
}

impl<M: Mmu> PagingSystem<M> {
    /// Configure paging with the registered pools and the shared-region size.
    ///
    /// # Errors
    /// - [`FramePoolError::UnknownPool`] if a configured pool is not
    ///   registered.
    /// - [`PagingError::SharedRegionTooLarge`] or
    ///   [`PagingError::UnalignedSharedRegion`] for a shared region that is
    ///   not a whole number of pages inside directory slot 0.
    /// - [`PagingError::KernelPoolNotShared`] if the kernel pool does not end
    ///   inside the shared region.
    pub fn init(
        mmu: M,
        frames: FramePoolRegistry,
        config: PagingConfig,
    ) -> Result<Self, PagingError> {
        let (Some(kernel), Some(_)) = (
            frames.pool(config.kernel_pool),
            frames.pool(config.process_pool),
        ) else {
            return Err(FramePoolError::UnknownPool.into());
        };
        let kernel_end = u64::from(kernel.end()) * u64::from(PAGE_SIZE);
        if config.shared_size > BYTES_PER_DIRECTORY_SLOT {
            return Err(PagingError::SharedRegionTooLarge {
                size: config.shared_size,
            });
        }
        if !config.shared_size.is_multiple_of(PAGE_SIZE) {
            return Err(PagingError::UnalignedSharedRegion {
                size: config.shared_size,
            });
        }
        if kernel_end > u64::from(config.shared_size) {
            warn!(
                "paging: kernel pool ends at {kernel_end:#x}, past the shared region of {:#x} bytes",
                config.shared_size
            );
            return Err(PagingError::KernelPoolNotShared {
                shared_size: config.shared_size,
            });
        }

        info!(
            "paging: initialized, kernel pool {:?}, process pool {:?}, shared region {} KiB",
            config.kernel_pool,
            config.process_pool,
            config.shared_size / 1024
        );
        Ok(Self {
            mmu,
            frames,
            config,
            tables: Vec::new(),
            current: None,
        })
    }

    #[inline]
    #[must_use]
    pub const fn mmu(&self) -> &M {
        &self.mmu
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> &FramePoolRegistry {
        &self.frames
    }

    #[inline]
    pub const fn frames_mut(&mut self) -> &mut FramePoolRegistry {
        &mut self.frames
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &PagingConfig {
        &self.config
    }

    /// The loaded page table, if any.
    #[inline]
    #[must_use]
    pub const fn current(&self) -> Option<PageTableId> {
        self.current
    }

    #[must_use]
    pub fn table(&self, id: PageTableId) -> Option<&PageTable> {
        self.tables.get(id.0)
    }

    #[inline]
    #[must_use]
    pub fn paging_enabled(&self) -> bool {
        self.mmu.paging_enabled()
    }

    /// Build a new address space with the shared region mapped and the
    /// self-map installed.
    ///
    /// # Errors
    /// The frame pool's error if no frames are left; nothing is leaked.
    pub fn create_page_table(&mut self) -> Result<PageTableId, PagingError> {
        let pool = if self.mmu.paging_enabled() {
            self.config.kernel_pool
        } else {
            self.config.process_pool
        };

        let directory = self.frames.get_frames(pool, 1)?;
        let shared = match self.frames.get_frames(pool, 1) {
            Ok(frame) => frame,
            Err(e) => {
                self.release_quietly(directory);
                return Err(e.into());
            }
        };

        // Safety: both frames were just allocated to us and are reachable
        // physically (paging off, or inside the identity-mapped kernel pool).
        unsafe {
            let table = self.mmu.table_mut(shared);
            table.fill(Pte::new());
            for page in 0..pages_for(self.config.shared_size) {
                let va = VirtualAddress::new(page * PAGE_SIZE);
                table.set(TableIndex::from(va), Pte::leaf(FrameNumber::new(page)));
            }

            let dir = self.mmu.directory_mut(directory);
            dir.fill(Pde::absent());
            dir.set(SHARED_SLOT, Pde::table(shared));
            dir.set(RECURSIVE_SLOT, recursive::self_map_entry(directory));
        }

        let id = PageTableId(self.tables.len());
        self.tables.push(PageTable {
            directory,
            vm_pools: Vec::new(),
        });
        info!("paging: page table {id:?} with directory in frame {directory}");
        Ok(id)
    }

    /// Make `id` the current page table and write CR3.
    ///
    /// # Errors
    /// [`PagingError::UnknownTable`].
    pub fn load(&mut self, id: PageTableId) -> Result<(), PagingError> {
        let cr3 = self.table(id).ok_or(PagingError::UnknownTable)?.cr3();
        // Safety: the directory maps the shared region the kernel runs in.
        unsafe { self.mmu.load_cr3(cr3) };
        if self.current != Some(id) {
            debug!("paging: loaded page table {id:?}");
        }
        self.current = Some(id);
        Ok(())
    }

    /// Turn on hardware translation. Idempotent.
    ///
    /// # Errors
    /// [`PagingError::NoTableLoaded`] if [`load`](Self::load) was never called.
    pub fn enable_paging(&mut self) -> Result<(), PagingError> {
        if self.current.is_none() {
            return Err(PagingError::NoTableLoaded);
        }
        if self.mmu.paging_enabled() {
            return Ok(());
        }
        // Safety: CR3 holds a directory that identity maps the shared region.
        unsafe { self.mmu.enable_paging() };
        info!("paging: enabled");
        Ok(())
    }

    /// Discard cached translations by reloading CR3.
    pub fn flush_tlb(&self) {
        if let Some(table) = self.current.and_then(|id| self.table(id)) {
            // Safety: reloads the value that is already active.
            unsafe { self.mmu.load_cr3(table.cr3()) };
        }
    }

    /// Resolve a page fault in the current address space.
    ///
    /// # Errors
    /// - [`PagingError::AccessViolation`] if VM pools are registered and none
    ///   claims the address, or the address lies in directory slot 0 or the
    ///   recursive window.
    /// - [`PagingError::ProtectionViolation`] for faults on present pages.
    /// - [`PagingError::AlreadyMapped`] if the translation exists already.
    /// - [`PagingError::Frames`] if no frame could be allocated.
    /// - [`PagingError::NoTableLoaded`] / [`PagingError::PagingDisabled`].
    pub fn handle_fault(&mut self, fault: PageFault) -> Result<FaultResolution, PagingError> {
        let id = self.current.ok_or(PagingError::NoTableLoaded)?;
        if !self.mmu.paging_enabled() {
            return Err(PagingError::PagingDisabled);
        }
        let table = self.table(id).ok_or(PagingError::UnknownTable)?;
        let address = fault.address;

        if recursive::is_in_window(address) {
            error!("page fault: {address} lies in the page-table window");
            return Err(PagingError::AccessViolation { address });
        }

        let frame_pool = if table.vm_pools.is_empty() {
            self.config.process_pool
        } else if let Some(window) = table.claiming_pool(address) {
            window.frame_pool
        } else {
            error!("page fault: {address} is not in any VM pool");
            return Err(PagingError::AccessViolation { address });
        };

        if fault.error.present() {
            error!("page fault: {address}: {}", fault.error.explain());
            return Err(PagingError::ProtectionViolation { address });
        }

        let (dir, idx) = split_indices(address);
        if dir == SHARED_SLOT {
            error!("page fault: {address} lies in the shared region's directory slot");
            return Err(PagingError::AccessViolation { address });
        }

        // Safety: slot 1023 maps the loaded directory at the directory window.
        let pde: &mut Pde = unsafe { self.mmu.virt_to_mut(recursive::pde_window(dir)) };
        let new_table = if pde.present() {
            None
        } else {
            let frame = self
                .frames
                .get_frames(self.config.process_pool, 1)
                .inspect_err(|e| warn!("page fault: no frame for a table at {address}: {e}"))?;
            *pde = Pde::table(frame);

            // Safety: the directory entry just written makes the table visible.
            let table: &mut SecondLevelTable =
                unsafe { self.mmu.virt_to_mut(recursive::table_window(dir)) };
            table.fill(Pte::absent_user());
            debug!("page fault: new table in frame {frame} for slot {}", dir.as_usize());
            Some(frame)
        };

        // Safety: the directory entry for `dir` is present.
        let pte: &mut Pte = unsafe { self.mmu.virt_to_mut(recursive::pte_window(dir, idx)) };
        if pte.present() {
            error!("page fault: {address} is already mapped");
            return Err(PagingError::AlreadyMapped { address });
        }

        let frame = self
            .frames
            .get_frames(frame_pool, 1)
            .inspect_err(|e| warn!("page fault: no frame for {address}: {e}"))?;
        *pte = Pte::leaf(frame);

        let page = address.page();
        debug!("page fault: mapped {page} to frame {frame}");
        Ok(FaultResolution {
            page,
            frame,
            new_table,
        })
    }

    /// Append a VM pool to the legitimacy list of page table `id`.
    ///
    /// # Errors
    /// [`PagingError::UnknownTable`], [`PagingError::ReservedAddress`] if the
    /// window touches directory slot 0 or the recursive window, or
    /// [`PagingError::OverlappingPool`].
    pub fn register_pool(
        &mut self,
        id: PageTableId,
        window: VmPoolWindow,
    ) -> Result<(), PagingError> {
        let table = self.tables.get_mut(id.0).ok_or(PagingError::UnknownTable)?;

        let reserved = [SHARED_SLOT.base(), recursive::TABLE_WINDOW_BASE]
            .map(|base| VmPoolWindow::new(base, BYTES_PER_DIRECTORY_SLOT, window.frame_pool));
        if reserved.iter().any(|r| window.overlaps(r)) {
            warn!("paging: VM pool at {} covers a reserved slot", window.base);
            return Err(PagingError::ReservedAddress {
                address: window.base,
            });
        }
        if table.vm_pools.iter().any(|w| w.overlaps(&window)) {
            warn!("paging: VM pool at {} overlaps a registered pool", window.base);
            return Err(PagingError::OverlappingPool { base: window.base });
        }

        table.vm_pools.push(window);
        info!(
            "paging: registered VM pool {}..+{:#x} with {id:?}",
            window.base, window.size
        );
        Ok(())
    }

    /// Unmap `page` in the current page table and give its frame back.
    ///
    /// Returns the released frame, or `None` if the page was not mapped.
    ///
    /// # Errors
    /// [`PagingError::NotCurrent`] / [`PagingError::PagingDisabled`] since
    /// only the loaded table is reachable, [`PagingError::ReservedAddress`]
    /// for the shared region and the recursive window, or the frame pool's
    /// release error.
    pub fn free_page(
        &mut self,
        id: PageTableId,
        page: VirtualPage,
    ) -> Result<Option<FrameNumber>, PagingError> {
        self.ensure_reachable(id)?;
        let freed = self.unmap(page)?;
        if freed.is_some() {
            self.flush_tlb();
        }
        Ok(freed)
    }

    /// Unmap `count` pages starting at `first`, flushing the TLB once.
    ///
    /// Returns the number of frames released.
    ///
    /// # Errors
    /// As [`free_page`](Self::free_page). Pages before the failing one stay
    /// unmapped.
    pub fn free_range(
        &mut self,
        id: PageTableId,
        first: VirtualPage,
        count: u32,
    ) -> Result<u32, PagingError> {
        self.ensure_reachable(id)?;
        let mut released = 0;
        let result = (0..count).try_for_each(|n| {
            if self.unmap(first + n)?.is_some() {
                released += 1;
            }
            Ok(())
        });
        self.flush_tlb();
        result.map(|()| released)
    }

    fn ensure_reachable(&self, id: PageTableId) -> Result<(), PagingError> {
        self.table(id).ok_or(PagingError::UnknownTable)?;
        if self.current != Some(id) {
            return Err(PagingError::NotCurrent);
        }
        if !self.mmu.paging_enabled() {
            return Err(PagingError::PagingDisabled);
        }
        Ok(())
    }

    fn unmap(&mut self, page: VirtualPage) -> Result<Option<FrameNumber>, PagingError> {
        let address = page.base();
        let (dir, idx) = split_indices(address);
        if dir == SHARED_SLOT || dir == RECURSIVE_SLOT {
            return Err(PagingError::ReservedAddress { address });
        }

        // Safety: slot 1023 maps the loaded directory.
        let pde: &Pde = unsafe { self.mmu.virt_to_mut(recursive::pde_window(dir)) };
        if !pde.present() {
            return Ok(None);
        }

        // Safety: the directory entry for `dir` is present.
        let pte: &mut Pte = unsafe { self.mmu.virt_to_mut(recursive::pte_window(dir, idx)) };
        let Some(frame) = pte.mapped_frame() else {
            return Ok(None);
        };

        self.frames.release(frame)?;
        *pte = Pte::absent();

        debug!("paging: unmapped {page}, released frame {frame}");
        Ok(Some(frame))
    }

    /// Translate `va` in the current address space without touching it.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.current?;
        if !self.mmu.paging_enabled() {
            return Some(PhysicalAddress::new(va.as_u32()));
        }

        let (dir, idx) = split_indices(va);
        // Safety: slot 1023 maps the loaded directory.
        let pde: &Pde = unsafe { self.mmu.virt_to_mut(recursive::pde_window(dir)) };
        pde.next_table()?;

        // Safety: the directory entry for `dir` is present.
        let pte: &Pte = unsafe { self.mmu.virt_to_mut(recursive::pte_window(dir, idx)) };
        pte.mapped_frame().map(|frame| frame.base() + va.offset())
    }

    fn release_quietly(&mut self, frame: FrameNumber) {
        if let Err(e) = self.frames.release(frame) {
            warn!("paging: could not return frame {frame}: {e}");
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PagingError {
    #[error("no page table loaded")]
    NoTableLoaded,
    #[error("paging is not enabled")]
    PagingDisabled,
    #[error("unknown page table")]
    UnknownTable,
    #[error("page table is not loaded")]
    NotCurrent,
    #[error("shared region of {size:#x} bytes exceeds one directory slot")]
    SharedRegionTooLarge { size: u32 },
    #[error("shared region of {size:#x} bytes is not page aligned")]
    UnalignedSharedRegion { size: u32 },
    #[error("kernel pool lies outside the shared region of {shared_size:#x} bytes")]
    KernelPoolNotShared { shared_size: u32 },
    #[error("access violation at {address}")]
    AccessViolation { address: VirtualAddress },
    #[error("protection violation at {address}")]
    ProtectionViolation { address: VirtualAddress },
    #[error("{address} is already mapped")]
    AlreadyMapped { address: VirtualAddress },
    #[error("{address} lies in a reserved directory slot")]
    ReservedAddress { address: VirtualAddress },
    #[error("VM pool at {base} overlaps a registered pool")]
    OverlappingPool { base: VirtualAddress },
    #[error(transparent)]
    Frames(#[from] FramePoolError),
}

impl PagingError {
    /// Errors that leave the faulting context without a way forward.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::AccessViolation { .. }
            | Self::ProtectionViolation { .. }
            | Self::AlreadyMapped { .. }
            | Self::SharedRegionTooLarge { .. }
            | Self::UnalignedSharedRegion { .. }
            | Self::KernelPoolNotShared { .. } => true,
            Self::Frames(e) => e.is_fatal(),
            _ => false,
        }
    }
}
