//! # Kernel Memory Manager
//!
//! [`KernelMemory`] owns the paging system and the kernel's own page table.
//! [`KernelMemory::boot`] brings memory management up from a
//! [`MemoryLayout`]:
//!
//! 1. Kernel pool, keeping its bitmap in its own first frame.
//! 2. Process pool, with its bitmap carved out of the kernel pool.
//! 3. Both pools registered; the memory hole marked inaccessible.
//! 4. Paging initialized; the kernel page table created and loaded.
//! 5. Paging enabled.

use kernel_alloc::frame_pool::{FramePool, FramePoolError, needed_info_frames};
use kernel_alloc::paging::{PageTableId, PagingConfig, PagingError, PagingSystem};
use kernel_alloc::registry::{FramePoolRegistry, PoolId};
use kernel_alloc::vm_pool::{VmPool, VmPoolError};
use kernel_info::memory::MemoryLayout;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::Mmu;
use log::info;

/// Paging state of the running kernel.
pub struct KernelMemory<M: Mmu> {
    paging: PagingSystem<M>,
    kernel_table: PageTableId,
    kernel_pool: PoolId,
    process_pool: PoolId,
}

impl<M: Mmu> KernelMemory<M> {
    /// Bring up frame pools and paging.
    ///
    /// # Safety
    /// - Paging must be off.
    /// - The frames described by `layout` must be installed RAM that nothing
    ///   else uses, and the running code must lie in the shared region.
    ///
    /// # Errors
    /// Any [`BootError`]; the machine cannot continue without paging.
    pub unsafe fn boot(mmu: M, layout: &MemoryLayout) -> Result<Self, BootError> {
        let mut frames = FramePoolRegistry::new();

        let kernel = unsafe {
            FramePool::new(
                &mmu,
                layout.kernel_pool.start,
                layout.kernel_pool.frames,
                None,
            )
        }?;
        let kernel_pool = frames.register(kernel)?;

        let info_frames = needed_info_frames(layout.process_pool.frames);
        let info = frames.get_frames(kernel_pool, info_frames)?;
        let process = unsafe {
            FramePool::new(
                &mmu,
                layout.process_pool.start,
                layout.process_pool.frames,
                Some(info),
            )
        }?;
        let process_pool = frames.register(process)?;

        if let Some(hole) = layout.memory_hole {
            frames.mark_inaccessible(process_pool, hole.start, hole.frames)?;
        }

        let config = PagingConfig {
            kernel_pool,
            process_pool,
            shared_size: layout.shared_size,
        };
        let mut paging = PagingSystem::init(mmu, frames, config)?;
        let kernel_table = paging.create_page_table()?;
        paging.load(kernel_table)?;
        paging.enable_paging()?;

        info!(
            "memory: up, {} frames free, kernel table {kernel_table:?}",
            paging.frames().free_frames()
        );
        Ok(Self {
            paging,
            kernel_table,
            kernel_pool,
            process_pool,
        })
    }

    #[inline]
    #[must_use]
    pub const fn paging(&self) -> &PagingSystem<M> {
        &self.paging
    }

    #[inline]
    pub const fn paging_mut(&mut self) -> &mut PagingSystem<M> {
        &mut self.paging
    }

    #[inline]
    #[must_use]
    pub const fn kernel_table(&self) -> PageTableId {
        self.kernel_table
    }

    #[inline]
    #[must_use]
    pub const fn kernel_pool(&self) -> PoolId {
        self.kernel_pool
    }

    #[inline]
    #[must_use]
    pub const fn process_pool(&self) -> PoolId {
        self.process_pool
    }

    /// Create a VM pool in the kernel's address space.
    ///
    /// # Errors
    /// See [`VmPool::new`].
    pub fn vm_pool(
        &mut self,
        base: VirtualAddress,
        size: u32,
        frame_pool: PoolId,
    ) -> Result<VmPool, VmPoolError> {
        VmPool::new(&mut self.paging, base, size, frame_pool, self.kernel_table)
    }

    /// Release a region of `pool`.
    ///
    /// # Errors
    /// See [`VmPool::release`].
    pub fn release(&mut self, pool: &mut VmPool, start: VirtualAddress) -> Result<(), VmPoolError> {
        pool.release(&mut self.paging, start)
    }
}

/// Reasons memory management could not be brought up.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BootError {
    #[error("frame pool setup failed: {0}")]
    Frames(#[from] FramePoolError),
    #[error("paging setup failed: {0}")]
    Paging(#[from] PagingError),
}
