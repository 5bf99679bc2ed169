//! # Virtual-Memory Pools
//!
//! A [`VmPool`] is a contiguous window of one address space from which
//! regions are handed out. Regions are packed back to back, starting one page
//! above the pool base, and are backed lazily: [`VmPool::allocate`] only
//! reserves addresses; the first access faults and the paging system maps a
//! frame from the pool's frame pool.
//!
//! The part of a pool the fault path needs is its [`VmPoolWindow`], which is
//! copied into the page table on registration.

use crate::paging::{PageTableId, PagingError, PagingSystem};
use crate::registry::PoolId;
use alloc::vec::Vec;
use kernel_info::memory::VM_POOL_MAX_REGIONS;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, pages_for};
use kernel_vmem::Mmu;
use log::{debug, info};

/// Address window of a VM pool and the frame pool that backs it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VmPoolWindow {
    pub base: VirtualAddress,
    pub size: u32,
    pub frame_pool: PoolId,
}

impl VmPoolWindow {
    #[inline]
    #[must_use]
    pub const fn new(base: VirtualAddress, size: u32, frame_pool: PoolId) -> Self {
        Self {
            base,
            size,
            frame_pool,
        }
    }

    /// One past the last address, widened so a window may end at 4 GiB.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.as_u32() as u64 + self.size as u64
    }

    /// Whether `address` lies inside `[base, base + size)`.
    #[inline]
    #[must_use]
    pub const fn is_legitimate(&self, address: VirtualAddress) -> bool {
        let a = address.as_u32() as u64;
        self.base.as_u32() as u64 <= a && a < self.end()
    }

    /// Whether the two windows share an address. Empty windows overlap nothing.
    #[inline]
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.size != 0
            && other.size != 0
            && (self.base.as_u32() as u64) < other.end()
            && (other.base.as_u32() as u64) < self.end()
    }
}

/// A region handed out by [`VmPool::allocate`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Region {
    pub base: VirtualAddress,
    /// Whole pages, in bytes.
    pub size: u32,
}

impl Region {
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.as_u32() as u64 + self.size as u64
    }

    #[inline]
    #[must_use]
    pub const fn pages(&self) -> u32 {
        self.size / PAGE_SIZE
    }
}

/// A lazily backed window of virtual memory.
#[derive(Debug)]
pub struct VmPool {
    window: VmPoolWindow,
    page_table: PageTableId,
    regions: Vec<Region>,
    max_regions: usize,
}

impl VmPool {
    /// Create a pool over `[base, base + size)` in `page_table` and register
    /// it with the paging system.
    ///
    /// # Errors
    /// [`VmPoolError::Unaligned`] if `base` is not page aligned, or the
    /// paging system's registration error.
    pub fn new<M: Mmu>(
        paging: &mut PagingSystem<M>,
        base: VirtualAddress,
        size: u32,
        frame_pool: PoolId,
        page_table: PageTableId,
    ) -> Result<Self, VmPoolError> {
        if !base.is_page_aligned() {
            return Err(VmPoolError::Unaligned { base });
        }

        let window = VmPoolWindow::new(base, size, frame_pool);
        paging.register_pool(page_table, window)?;

        info!("vm pool: {base}..+{size:#x} backed by {frame_pool:?}");
        Ok(Self {
            window,
            page_table,
            regions: Vec::new(),
            max_regions: VM_POOL_MAX_REGIONS,
        })
    }

    /// Override the number of regions the pool can track.
    #[must_use]
    pub fn with_max_regions(mut self, max_regions: usize) -> Self {
        self.max_regions = max_regions;
        self
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.window.base
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.window.size
    }

    #[inline]
    #[must_use]
    pub const fn window(&self) -> &VmPoolWindow {
        &self.window
    }

    #[inline]
    #[must_use]
    pub const fn page_table(&self) -> PageTableId {
        self.page_table
    }

    #[inline]
    #[must_use]
    pub const fn frame_pool(&self) -> PoolId {
        self.window.frame_pool
    }

    /// Allocated regions, lowest address first.
    #[inline]
    #[must_use]
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    #[inline]
    #[must_use]
    pub const fn is_legitimate(&self, address: VirtualAddress) -> bool {
        self.window.is_legitimate(address)
    }

    /// Reserve `size` bytes, rounded up to whole pages, directly after the
    /// last region. Nothing is mapped until first access.
    ///
    /// # Errors
    /// - [`VmPoolError::EmptyPool`] if the pool has size 0.
    /// - [`VmPoolError::ZeroSize`] for an empty request.
    /// - [`VmPoolError::RegionLimit`] if the region list is full.
    /// - [`VmPoolError::OutOfSpace`] if the region would end past the pool.
    pub fn allocate(&mut self, size: u32) -> Result<VirtualAddress, VmPoolError> {
        if self.window.size == 0 {
            return Err(VmPoolError::EmptyPool);
        }
        if size == 0 {
            return Err(VmPoolError::ZeroSize);
        }
        if self.regions.len() >= self.max_regions {
            return Err(VmPoolError::RegionLimit {
                max: self.max_regions,
            });
        }

        let bytes = pages_for(size)
            .checked_mul(PAGE_SIZE)
            .ok_or(VmPoolError::OutOfSpace { requested: size })?;
        let start = self.regions.last().map_or_else(
            || u64::from(self.window.base.as_u32()) + u64::from(PAGE_SIZE),
            Region::end,
        );
        if start + u64::from(bytes) > self.window.end() {
            return Err(VmPoolError::OutOfSpace { requested: size });
        }

        #[allow(clippy::cast_possible_truncation)]
        let base = VirtualAddress::new(start as u32);
        self.regions.push(Region { base, size: bytes });
        debug!("vm pool: allocated {base}..+{bytes:#x}");
        Ok(base)
    }

    /// Unmap every page of the region starting at `start`, return its frames
    /// and drop it from the list.
    ///
    /// # Errors
    /// [`VmPoolError::UnknownRegion`] if no region starts at `start`;
    /// [`PagingError::NotCurrent`] or [`PagingError::PagingDisabled`] if the
    /// pool's page table is not the active one.
    pub fn release<M: Mmu>(
        &mut self,
        paging: &mut PagingSystem<M>,
        start: VirtualAddress,
    ) -> Result<(), VmPoolError> {
        let pos = self
            .regions
            .iter()
            .position(|r| r.base == start)
            .ok_or(VmPoolError::UnknownRegion { address: start })?;
        let region = self.regions[pos];

        let released = paging.free_range(self.page_table, region.base.page(), region.pages())?;
        self.regions.remove(pos);

        debug!(
            "vm pool: released {}..+{:#x}, {released} frame(s) returned",
            region.base, region.size
        );
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmPoolError {
    #[error("pool base {base} is not page aligned")]
    Unaligned { base: VirtualAddress },
    #[error("pool has no space")]
    EmptyPool,
    #[error("zero-sized region requested")]
    ZeroSize,
    #[error("region list is full ({max} regions)")]
    RegionLimit { max: usize },
    #[error("no room for {requested} bytes")]
    OutOfSpace { requested: u32 },
    #[error("no region starts at {address}")]
    UnknownRegion { address: VirtualAddress },
    #[error(transparent)]
    Paging(#[from] PagingError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_pool::FramePool;
    use crate::paging::PagingConfig;
    use crate::registry::FramePoolRegistry;
    use kernel_memory_addresses::FrameNumber;
    use kernel_vmem::sim::SimulatedMachine;

    const POOL_BASE: u32 = 0x0800_0000;
    const POOL_SIZE: u32 = 0x0010_0000;

    fn paging() -> (PagingSystem<SimulatedMachine>, PageTableId) {
        let m = SimulatedMachine::new(2048);
        let mut frames = FramePoolRegistry::new();
        let kernel = unsafe { FramePool::new(&m, FrameNumber::new(512), 512, None) }.unwrap();
        let kernel = frames.register(kernel).unwrap();
        let info = frames.get_frames(kernel, 1).unwrap();
        let process =
            unsafe { FramePool::new(&m, FrameNumber::new(1024), 1024, Some(info)) }.unwrap();
        let process = frames.register(process).unwrap();
        let config = PagingConfig {
            kernel_pool: kernel,
            process_pool: process,
            shared_size: 4 << 20,
        };
        let mut p = PagingSystem::init(m, frames, config).unwrap();
        let id = p.create_page_table().unwrap();
        p.load(id).unwrap();
        p.enable_paging().unwrap();
        (p, id)
    }

    fn pool(p: &mut PagingSystem<SimulatedMachine>, id: PageTableId) -> VmPool {
        let frames = p.config().process_pool;
        VmPool::new(p, VirtualAddress::new(POOL_BASE), POOL_SIZE, frames, id).unwrap()
    }

    fn fill(p: &mut PagingSystem<SimulatedMachine>, region: Region) {
        for page in 0..region.pages() {
            let va = region.base + page * PAGE_SIZE;
            if let Err(fault) = p.mmu().write_u32(va, page) {
                p.handle_fault(fault).unwrap();
                p.mmu().write_u32(va, page).unwrap();
            }
        }
    }

    #[test]
    fn window_bounds() {
        let w = VmPoolWindow::new(VirtualAddress::new(POOL_BASE), POOL_SIZE, PoolId::new(0));
        assert!(w.is_legitimate(VirtualAddress::new(POOL_BASE)));
        assert!(w.is_legitimate(VirtualAddress::new(POOL_BASE + POOL_SIZE - 1)));
        assert!(!w.is_legitimate(VirtualAddress::new(POOL_BASE + POOL_SIZE)));
        assert!(!w.is_legitimate(VirtualAddress::new(POOL_BASE - 1)));

        let top = VmPoolWindow::new(VirtualAddress::new(0xFFFF_F000), PAGE_SIZE, PoolId::new(0));
        assert!(top.is_legitimate(VirtualAddress::new(0xFFFF_FFFF)));

        let empty = VmPoolWindow::new(VirtualAddress::new(POOL_BASE), 0, PoolId::new(0));
        assert!(!empty.is_legitimate(VirtualAddress::new(POOL_BASE)));
        assert!(!empty.overlaps(&w));
    }

    #[test]
    fn allocations_round_up_and_pack() {
        let (mut p, id) = paging();
        let mut pool = pool(&mut p, id);

        let a = pool.allocate(100).unwrap();
        let b = pool.allocate(4096).unwrap();
        let c = pool.allocate(5000).unwrap();
        assert_eq!(a, VirtualAddress::new(POOL_BASE + 0x1000));
        assert_eq!(b, VirtualAddress::new(POOL_BASE + 0x2000));
        assert_eq!(c, VirtualAddress::new(POOL_BASE + 0x3000));

        let sizes: Vec<u32> = pool.regions().iter().map(|r| r.size).collect();
        assert_eq!(sizes, [4096, 4096, 8192]);
    }

    #[test]
    fn allocate_rejects_bad_requests() {
        let (mut p, id) = paging();
        let mut pool = pool(&mut p, id);
        assert_eq!(pool.allocate(0), Err(VmPoolError::ZeroSize));
        assert_eq!(
            pool.allocate(POOL_SIZE),
            Err(VmPoolError::OutOfSpace { requested: POOL_SIZE })
        );
        assert_eq!(
            pool.allocate(u32::MAX),
            Err(VmPoolError::OutOfSpace { requested: u32::MAX })
        );
        // Everything but the list page fits exactly.
        pool.allocate(POOL_SIZE - PAGE_SIZE).unwrap();
        assert!(pool.allocate(1).is_err());
    }

    #[test]
    fn empty_pool_and_region_limit() {
        let (mut p, id) = paging();
        let frames = p.config().process_pool;
        let mut empty =
            VmPool::new(&mut p, VirtualAddress::new(0x1000_0000), 0, frames, id).unwrap();
        assert_eq!(empty.allocate(1), Err(VmPoolError::EmptyPool));

        let mut small = pool(&mut p, id).with_max_regions(2);
        small.allocate(1).unwrap();
        small.allocate(1).unwrap();
        assert_eq!(small.allocate(1), Err(VmPoolError::RegionLimit { max: 2 }));
    }

    #[test]
    fn unaligned_base_is_rejected() {
        let (mut p, id) = paging();
        let frames = p.config().process_pool;
        let base = VirtualAddress::new(POOL_BASE + 8);
        assert_eq!(
            VmPool::new(&mut p, base, POOL_SIZE, frames, id).err(),
            Some(VmPoolError::Unaligned { base })
        );
    }

    #[test]
    fn release_middle_region() {
        let (mut p, id) = paging();
        let mut pool = pool(&mut p, id);
        let regions: Vec<Region> = [100, 4096, 5000]
            .into_iter()
            .map(|size| {
                let base = pool.allocate(size).unwrap();
                *pool.regions().iter().find(|r| r.base == base).unwrap()
            })
            .collect();
        for &r in &regions {
            fill(&mut p, r);
        }

        let free = p.frames().free_frames();
        pool.release(&mut p, regions[1].base).unwrap();
        assert_eq!(p.frames().free_frames(), free + 1);
        assert_eq!(pool.regions(), &[regions[0], regions[2]]);

        // Neighbours keep their data.
        assert_eq!(p.mmu().read_u32(regions[0].base).unwrap(), 0);
        assert_eq!(p.mmu().read_u32(regions[2].base + PAGE_SIZE).unwrap(), 1);
        assert!(p.mmu().read_u32(regions[1].base).is_err());
    }

    #[test]
    fn release_of_untouched_region_frees_nothing() {
        let (mut p, id) = paging();
        let mut pool = pool(&mut p, id);
        let base = pool.allocate(3 * PAGE_SIZE).unwrap();
        let free = p.frames().free_frames();
        pool.release(&mut p, base).unwrap();
        assert_eq!(p.frames().free_frames(), free);
        assert!(pool.regions().is_empty());
    }

    #[test]
    fn release_unknown_region() {
        let (mut p, id) = paging();
        let mut pool = pool(&mut p, id);
        let base = pool.allocate(2 * PAGE_SIZE).unwrap();
        let inner = base + PAGE_SIZE;
        assert_eq!(
            pool.release(&mut p, inner),
            Err(VmPoolError::UnknownRegion { address: inner })
        );
        assert_eq!(pool.regions().len(), 1);
    }

    #[test]
    fn release_needs_the_owning_table_loaded() {
        let (mut p, id) = paging();
        let mut pool = pool(&mut p, id);
        let base = pool.allocate(1).unwrap();

        let other = p.create_page_table().unwrap();
        p.load(other).unwrap();
        assert_eq!(
            pool.release(&mut p, base),
            Err(VmPoolError::Paging(PagingError::NotCurrent))
        );
        assert_eq!(pool.regions().len(), 1);

        p.load(id).unwrap();
        pool.release(&mut p, base).unwrap();
    }
}
