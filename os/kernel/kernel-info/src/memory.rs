//! # Memory Layout

use kernel_memory_addresses::{FrameNumber, PAGE_SIZE};

/// First frame managed by the kernel pool (2 MiB).
pub const KERNEL_POOL_START_FRAME: u32 = 512;

/// Number of frames in the kernel pool (2 MiB worth).
pub const KERNEL_POOL_SIZE: u32 = 512;

/// First frame managed by the process pool (4 MiB).
pub const PROCESS_POOL_START_FRAME: u32 = 1024;

/// Number of frames in the process pool (28 MiB worth).
pub const PROCESS_POOL_SIZE: u32 = 7168;

/// First frame of the memory hole at 15 MiB.
pub const MEM_HOLE_START_FRAME: u32 = 3840;

/// Number of frames in the memory hole (1 MiB worth).
pub const MEM_HOLE_SIZE: u32 = 256;

/// Size of the identity-mapped region shared by every address space.
pub const SHARED_SIZE: u32 = 4 << 20;

/// Largest number of frames one pool can track: a single 4 KiB frame of
/// 2-bit states.
pub const MAX_POOL_FRAMES: u32 = PAGE_SIZE * 4;

/// Capacity of the frame-pool registry.
pub const MAX_FRAME_POOLS: usize = 8;

/// Default number of regions a VM pool can track: one page of
/// `{base, size}` pairs.
pub const VM_POOL_MAX_REGIONS: usize = (PAGE_SIZE as usize) / (2 * size_of::<u32>());

/// A run of physical frames.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrameRange {
    pub start: FrameNumber,
    pub frames: u32,
}

impl FrameRange {
    #[must_use]
    pub const fn new(start: u32, frames: u32) -> Self {
        Self {
            start: FrameNumber::new(start),
            frames,
        }
    }

    /// One past the last frame of the range.
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.start.as_u32() + self.frames
    }

    #[must_use]
    pub const fn contains(&self, frame: FrameNumber) -> bool {
        frame.as_u32() >= self.start.as_u32() && frame.as_u32() < self.end()
    }
}

/// Physical memory layout handed to the boot code.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryLayout {
    /// Frames for page directories and kernel data. Hosts its own bitmap.
    pub kernel_pool: FrameRange,
    /// Frames for process pages and fault-time page tables. Its bitmap is
    /// carved out of the kernel pool.
    pub process_pool: FrameRange,
    /// Frames inside the process pool that must never be handed out.
    pub memory_hole: Option<FrameRange>,
    /// Bytes identity mapped through directory slot 0.
    pub shared_size: u32,
}

impl MemoryLayout {
    pub const DEFAULT: Self = Self {
        kernel_pool: FrameRange::new(KERNEL_POOL_START_FRAME, KERNEL_POOL_SIZE),
        process_pool: FrameRange::new(PROCESS_POOL_START_FRAME, PROCESS_POOL_SIZE),
        memory_hole: Some(FrameRange::new(MEM_HOLE_START_FRAME, MEM_HOLE_SIZE)),
        shared_size: SHARED_SIZE,
    };
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

const _: () = {
    assert!(KERNEL_POOL_SIZE <= MAX_POOL_FRAMES);
    assert!(PROCESS_POOL_SIZE <= MAX_POOL_FRAMES);
    assert!(KERNEL_POOL_START_FRAME + KERNEL_POOL_SIZE <= PROCESS_POOL_START_FRAME);
    assert!(MEM_HOLE_START_FRAME >= PROCESS_POOL_START_FRAME);
    assert!(MEM_HOLE_START_FRAME + MEM_HOLE_SIZE <= PROCESS_POOL_START_FRAME + PROCESS_POOL_SIZE);
    assert!(SHARED_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(SHARED_SIZE <= 4 << 20);
    // The kernel pool must stay reachable through the identity map.
    assert!((KERNEL_POOL_START_FRAME + KERNEL_POOL_SIZE) * PAGE_SIZE <= SHARED_SIZE);
    assert!(VM_POOL_MAX_REGIONS == 512);
};
