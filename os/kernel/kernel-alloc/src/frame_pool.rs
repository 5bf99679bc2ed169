//! # Contiguous Frame Pool
//!
//! Allocation state for one contiguous run of physical frames, two bits per
//! frame:
//!
//! | Bits | State |
//! |------|-------|
//! | `00` | [`FrameState::Free`] |
//! | `01` | [`FrameState::HeadOfSequence`]: first frame of an allocated run |
//! | `11` | [`FrameState::Allocated`]: any later frame of a run |
//!
//! Frame `i` of the pool lives in bitmap byte `i / 4` at bit offset
//! `2 * (i % 4)`. The bitmap occupies one frame, either the first frame of
//! the pool itself or a frame supplied by the caller.

use core::ptr::NonNull;
use kernel_info::memory::MAX_POOL_FRAMES;
use kernel_memory_addresses::{FrameNumber, PAGE_SIZE};
use kernel_vmem::PhysMapper;
use log::{debug, info, warn};

/// Size of the bitmap frame in bytes.
const BITMAP_BYTES: usize = PAGE_SIZE as usize;

/// Frames whose state fits into one bitmap frame.
const FRAMES_PER_INFO_FRAME: u32 = MAX_POOL_FRAMES;

/// Allocation state of a single frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FrameState {
    Free,
    HeadOfSequence,
    Allocated,
}

impl FrameState {
    /// Decode two bits; the unused pattern `10` reads as a run head.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::Free,
            0b11 => Self::Allocated,
            _ => Self::HeadOfSequence,
        }
    }

    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u8 {
        match self {
            Self::Free => 0b00,
            Self::HeadOfSequence => 0b01,
            Self::Allocated => 0b11,
        }
    }
}

/// Number of frames needed to store the state of `frames` frames.
///
/// ```rust
/// # use kernel_alloc::frame_pool::needed_info_frames;
/// assert_eq!(needed_info_frames(1), 1);
/// assert_eq!(needed_info_frames(16384), 1);
/// assert_eq!(needed_info_frames(16385), 2);
/// ```
#[inline]
#[must_use]
pub const fn needed_info_frames(frames: u32) -> u32 {
    frames.div_ceil(FRAMES_PER_INFO_FRAME)
}

/// Allocator for one contiguous region of physical frames.
pub struct FramePool {
    base: FrameNumber,
    count: u32,
    info_frame: FrameNumber,
    self_hosted: bool,
    free: u32,
    bitmap: NonNull<[u8; BITMAP_BYTES]>,
}

// Safety: the bitmap frame is owned exclusively by this pool; the pool is only
// mutated under the caller's lock.
unsafe impl Send for FramePool {}

impl FramePool {
    /// Create a pool over `count` frames starting at `base`.
    ///
    /// With `info_frame == None` the bitmap lives in `base`, which is then
    /// permanently allocated. Otherwise the bitmap lives in the given frame,
    /// which the caller must have reserved elsewhere.
    ///
    /// # Safety
    /// The bitmap frame must be RAM reachable through `mapper` for as long
    /// as the pool exists and must not be used for anything else.
    ///
    /// # Errors
    /// [`FramePoolError::Empty`] for `count == 0`,
    /// [`FramePoolError::TooManyFrames`] if the states do not fit one frame,
    /// [`FramePoolError::BeyondAddressSpace`] if the pool runs past the last
    /// 32-bit frame.
    pub unsafe fn new<M: PhysMapper>(
        mapper: &M,
        base: FrameNumber,
        count: u32,
        info_frame: Option<FrameNumber>,
    ) -> Result<Self, FramePoolError> {
        if count == 0 {
            return Err(FramePoolError::Empty);
        }
        if count > FRAMES_PER_INFO_FRAME {
            return Err(FramePoolError::TooManyFrames {
                count,
                max: FRAMES_PER_INFO_FRAME,
            });
        }
        if base.as_u32() + count > FrameNumber::MAX.as_u32() + 1 {
            return Err(FramePoolError::BeyondAddressSpace { base, count });
        }

        let (info, self_hosted) = info_frame.map_or((base, true), |f| (f, false));
        let bitmap: &mut [u8; BITMAP_BYTES] = unsafe { mapper.phys_to_mut(info.base()) };
        bitmap.fill(0);

        let mut pool = Self {
            base,
            count,
            info_frame: info,
            self_hosted,
            free: count,
            bitmap: NonNull::from(bitmap),
        };

        if self_hosted {
            pool.set_state(0, FrameState::Allocated);
            pool.free -= 1;
        }

        info!(
            "frame pool: frames {base}..{} ({count} frames), bitmap in frame {info}",
            pool.end()
        );
        Ok(pool)
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> FrameNumber {
        self.base
    }

    /// One past the last frame of the pool, as a raw frame number.
    ///
    /// A pool ending at [`FrameNumber::MAX`] has an end of `0x10_0000`.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.base.as_u32() + self.count
    }

    #[inline]
    #[must_use]
    pub const fn frame_count(&self) -> u32 {
        self.count
    }

    #[inline]
    #[must_use]
    pub const fn free_frames(&self) -> u32 {
        self.free
    }

    #[inline]
    #[must_use]
    pub const fn info_frame(&self) -> FrameNumber {
        self.info_frame
    }

    /// Whether the bitmap lives in the pool's own first frame.
    #[inline]
    #[must_use]
    pub const fn is_self_hosted(&self) -> bool {
        self.self_hosted
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, frame: FrameNumber) -> bool {
        frame.as_u32() >= self.base.as_u32() && frame.as_u32() < self.end()
    }

    /// Whether the frame ranges of two pools intersect.
    #[inline]
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.base.as_u32() < other.end() && other.base.as_u32() < self.end()
    }

    /// State of `frame`, or `None` if the pool does not own it.
    #[must_use]
    pub fn state(&self, frame: FrameNumber) -> Option<FrameState> {
        self.index_of(frame).map(|i| self.state_at(i))
    }

    /// States of all frames, in order.
    pub fn states(&self) -> impl Iterator<Item = FrameState> + '_ {
        (0..self.count).map(|i| self.state_at(i))
    }

    /// Allocate `n` contiguous frames, first fit.
    ///
    /// # Errors
    /// [`FramePoolError::ZeroFrames`], [`FramePoolError::InsufficientFrames`]
    /// or [`FramePoolError::NoContiguousRun`]; the pool is unchanged.
    pub fn get_frames(&mut self, n: u32) -> Result<FrameNumber, FramePoolError> {
        if n == 0 {
            warn!("frame pool {}: request for zero frames", self.base);
            return Err(FramePoolError::ZeroFrames);
        }
        if n > self.free {
            warn!(
                "frame pool {}: {n} frames requested, {} free",
                self.base, self.free
            );
            return Err(FramePoolError::InsufficientFrames {
                requested: n,
                free: self.free,
            });
        }

        let Some(start) = self.find_run(n) else {
            warn!("frame pool {}: no run of {n} free frames", self.base);
            return Err(FramePoolError::NoContiguousRun { requested: n });
        };

        self.set_state(start, FrameState::HeadOfSequence);
        for i in start + 1..start + n {
            self.set_state(i, FrameState::Allocated);
        }
        self.free -= n;

        let first = self.base + start;
        debug!("frame pool {}: allocated {n} frames at {first}", self.base);
        Ok(first)
    }

    /// Reserve `n` frames starting at `first` regardless of their state.
    ///
    /// The range becomes one allocated run. Frames that were already taken
    /// stay taken and are not counted twice.
    ///
    /// # Errors
    /// [`FramePoolError::OutOfRange`] if `first` or the range leaves the pool,
    /// also for `n == 0`.
    pub fn mark_inaccessible(&mut self, first: FrameNumber, n: u32) -> Result<(), FramePoolError> {
        let start = self
            .range_index(first, n)
            .ok_or(FramePoolError::OutOfRange { first, count: n })?;
        if n == 0 {
            return Ok(());
        }

        for i in start..start + n {
            if self.state_at(i) == FrameState::Free {
                self.free -= 1;
            }
            let state = if i == start {
                FrameState::HeadOfSequence
            } else {
                FrameState::Allocated
            };
            self.set_state(i, state);
        }

        info!(
            "frame pool {}: frames {first}..{} marked inaccessible",
            self.base,
            first + n
        );
        Ok(())
    }

    /// Release the run that starts at `first`. Returns the number of frames
    /// freed.
    ///
    /// # Errors
    /// [`FramePoolError::OutOfRange`] if the pool does not own `first`,
    /// [`FramePoolError::NotHeadOfSequence`] if no run starts there.
    pub fn release_run(&mut self, first: FrameNumber) -> Result<u32, FramePoolError> {
        let start = self
            .index_of(first)
            .ok_or(FramePoolError::OutOfRange { first, count: 1 })?;

        if self.state_at(start) != FrameState::HeadOfSequence {
            warn!("frame pool {}: frame {first} does not start a run", self.base);
            return Err(FramePoolError::NotHeadOfSequence(first));
        }

        self.set_state(start, FrameState::Free);
        let mut end = start + 1;
        while end < self.count && self.state_at(end) == FrameState::Allocated {
            self.set_state(end, FrameState::Free);
            end += 1;
        }

        let freed = end - start;
        self.free += freed;
        debug!("frame pool {}: released {freed} frames at {first}", self.base);
        Ok(freed)
    }

    fn find_run(&self, n: u32) -> Option<u32> {
        let mut run_start = 0;
        let mut run_len = 0;
        for i in 0..self.count {
            if self.state_at(i) == FrameState::Free {
                if run_len == 0 {
                    run_start = i;
                }
                run_len += 1;
                if run_len == n {
                    return Some(run_start);
                }
            } else {
                run_len = 0;
            }
        }
        None
    }

    fn index_of(&self, frame: FrameNumber) -> Option<u32> {
        frame
            .checked_offset_from(self.base)
            .filter(|&i| i < self.count)
    }

    fn range_index(&self, first: FrameNumber, n: u32) -> Option<u32> {
        let start = self.index_of(first)?;
        let end = start.checked_add(n)?;
        (end <= self.count).then_some(start)
    }

    fn state_at(&self, i: u32) -> FrameState {
        // Safety: the bitmap frame is owned by this pool.
        let bitmap = unsafe { self.bitmap.as_ref() };
        let byte = bitmap[(i / 4) as usize];
        FrameState::from_bits(byte >> ((i % 4) * 2))
    }

    fn set_state(&mut self, i: u32, state: FrameState) {
        // Safety: the bitmap frame is owned by this pool.
        let bitmap = unsafe { self.bitmap.as_mut() };
        let byte = &mut bitmap[(i / 4) as usize];
        let shift = (i % 4) * 2;
        *byte = (*byte & !(0b11 << shift)) | (state.into_bits() << shift);
    }
}

impl core::fmt::Debug for FramePool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FramePool")
            .field("base", &self.base)
            .field("count", &self.count)
            .field("info_frame", &self.info_frame)
            .field("free", &self.free)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FramePoolError {
    #[error("frame pool must contain at least one frame")]
    Empty,
    #[error("{count} frames do not fit one bitmap frame (max {max})")]
    TooManyFrames { count: u32, max: u32 },
    #[error("{count} frames from {base} run past the 32-bit address space")]
    BeyondAddressSpace { base: FrameNumber, count: u32 },
    #[error("zero frames requested")]
    ZeroFrames,
    #[error("{requested} frames requested but only {free} free")]
    InsufficientFrames { requested: u32, free: u32 },
    #[error("no contiguous run of {requested} free frames")]
    NoContiguousRun { requested: u32 },
    #[error("frames {first}+{count} lie outside the pool")]
    OutOfRange { first: FrameNumber, count: u32 },
    #[error("frame {0} is not the head of an allocated run")]
    NotHeadOfSequence(FrameNumber),
    #[error("no frame pool owns frame {0}")]
    UnknownFrame(FrameNumber),
    #[error("unknown frame pool")]
    UnknownPool,
    #[error("frame pool registry is full")]
    RegistryFull,
    #[error("frame pool at {base} overlaps a registered pool")]
    OverlappingPools { base: FrameNumber },
}

impl FramePoolError {
    /// Configuration violations cannot be recovered from at boot.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Empty
                | Self::TooManyFrames { .. }
                | Self::BeyondAddressSpace { .. }
                | Self::RegistryFull
                | Self::OverlappingPools { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_vmem::sim::SimulatedMachine;

    fn pool(machine: &SimulatedMachine, base: u32, count: u32) -> FramePool {
        unsafe { FramePool::new(machine, FrameNumber::new(base), count, None) }.unwrap()
    }

    fn free_count(pool: &FramePool) -> u32 {
        let free = pool.states().filter(|s| *s == FrameState::Free).count();
        u32::try_from(free).unwrap()
    }

    #[test]
    fn state_bits() {
        assert_eq!(FrameState::from_bits(0b00), FrameState::Free);
        assert_eq!(FrameState::from_bits(0b01), FrameState::HeadOfSequence);
        assert_eq!(FrameState::from_bits(0b10), FrameState::HeadOfSequence);
        assert_eq!(FrameState::from_bits(0b11), FrameState::Allocated);
    }

    #[test]
    fn self_hosted_pool_reserves_its_bitmap() {
        let m = SimulatedMachine::new(64);
        let p = pool(&m, 16, 32);
        assert!(p.is_self_hosted());
        assert_eq!(p.free_frames(), 31);
        assert_eq!(p.state(FrameNumber::new(16)), Some(FrameState::Allocated));
        assert_eq!(free_count(&p), p.free_frames());
    }

    #[test]
    fn bitmap_layout_in_memory() {
        let m = SimulatedMachine::new(64);
        let mut p = pool(&m, 16, 32);
        assert_eq!(p.get_frames(3).unwrap(), FrameNumber::new(17));
        // frame 0: 11, frame 1: 01, frames 2-3: 11
        let word = m.read_phys_u32(FrameNumber::new(16).base());
        assert_eq!(word & 0xFF, 0b1111_0111);
    }

    #[test]
    fn external_bitmap_leaves_every_frame_free() {
        let m = SimulatedMachine::new(64);
        let p = unsafe {
            FramePool::new(&m, FrameNumber::new(32), 16, Some(FrameNumber::new(8)))
        }
        .unwrap();
        assert!(!p.is_self_hosted());
        assert_eq!(p.free_frames(), 16);
        assert_eq!(p.info_frame(), FrameNumber::new(8));
    }

    #[test]
    fn configuration_limits() {
        let m = SimulatedMachine::new(64);
        let empty = unsafe { FramePool::new(&m, FrameNumber::new(1), 0, None) };
        assert_eq!(empty.unwrap_err(), FramePoolError::Empty);

        let huge = unsafe { FramePool::new(&m, FrameNumber::new(1), 16385, None) };
        let err = huge.unwrap_err();
        assert!(matches!(err, FramePoolError::TooManyFrames { count: 16385, max: 16384 }));
        assert!(err.is_fatal());

        assert!(unsafe { FramePool::new(&m, FrameNumber::new(1), 16384, None) }.is_ok());
    }

    #[test]
    fn first_fit_and_release() {
        let m = SimulatedMachine::new(64);
        let mut p = pool(&m, 0, 16);
        let a = p.get_frames(4).unwrap();
        let b = p.get_frames(2).unwrap();
        let c = p.get_frames(3).unwrap();
        assert_eq!((a.as_u32(), b.as_u32(), c.as_u32()), (1, 5, 7));
        assert_eq!(p.free_frames(), 15 - 9);

        assert_eq!(p.release_run(b).unwrap(), 2);
        assert_eq!(p.free_frames(), 15 - 7);
        assert_eq!(free_count(&p), p.free_frames());

        // The gap of two is reused before the tail.
        assert_eq!(p.get_frames(2).unwrap(), b);
        // A run of three does not fit the gap any more and goes to the tail.
        assert_eq!(p.get_frames(3).unwrap().as_u32(), 10);
    }

    #[test]
    fn release_stops_at_the_next_run() {
        let m = SimulatedMachine::new(64);
        let mut p = pool(&m, 0, 16);
        let a = p.get_frames(3).unwrap();
        let b = p.get_frames(3).unwrap();
        assert_eq!(p.release_run(a).unwrap(), 3);
        assert_eq!(p.state(b), Some(FrameState::HeadOfSequence));
        assert_eq!(p.state(b + 2), Some(FrameState::Allocated));
    }

    #[test]
    fn failed_requests_leave_the_pool_untouched() {
        let m = SimulatedMachine::new(64);
        let mut p = pool(&m, 0, 8);
        let before: Vec<_> = p.states().collect();

        assert_eq!(p.get_frames(0), Err(FramePoolError::ZeroFrames));
        assert_eq!(
            p.get_frames(8),
            Err(FramePoolError::InsufficientFrames { requested: 8, free: 7 })
        );
        assert_eq!(p.free_frames(), 7);
        assert_eq!(p.states().collect::<Vec<_>>(), before);
    }

    #[test]
    fn fragmentation_is_reported() {
        let m = SimulatedMachine::new(64);
        let mut p = pool(&m, 0, 8);
        let runs: Vec<_> = (0..7).map(|_| p.get_frames(1).unwrap()).collect();
        p.release_run(runs[0]).unwrap();
        p.release_run(runs[2]).unwrap();
        assert_eq!(
            p.get_frames(2),
            Err(FramePoolError::NoContiguousRun { requested: 2 })
        );
        assert_eq!(p.free_frames(), 2);
    }

    #[test]
    fn protocol_violations_do_not_mutate() {
        let m = SimulatedMachine::new(64);
        let mut p = pool(&m, 0, 8);
        let a = p.get_frames(3).unwrap();
        assert_eq!(
            p.release_run(a + 1),
            Err(FramePoolError::NotHeadOfSequence(a + 1))
        );
        assert_eq!(
            p.release_run(FrameNumber::new(0)),
            Err(FramePoolError::NotHeadOfSequence(FrameNumber::new(0)))
        );
        assert_eq!(
            p.release_run(FrameNumber::new(5)),
            Err(FramePoolError::NotHeadOfSequence(FrameNumber::new(5)))
        );
        assert!(matches!(
            p.release_run(FrameNumber::new(8)),
            Err(FramePoolError::OutOfRange { .. })
        ));
        assert_eq!(p.free_frames(), 4);
    }

    #[test]
    fn mark_inaccessible_reserves_range() {
        let m = SimulatedMachine::new(64);
        let mut p = pool(&m, 0, 16);
        p.mark_inaccessible(FrameNumber::new(4), 4).unwrap();
        assert_eq!(p.free_frames(), 11);
        assert_eq!(p.state(FrameNumber::new(4)), Some(FrameState::HeadOfSequence));
        assert_eq!(p.state(FrameNumber::new(7)), Some(FrameState::Allocated));
        assert_eq!(p.get_frames(4).unwrap(), FrameNumber::new(8));

        // Overlapping an allocated frame does not double count.
        p.mark_inaccessible(FrameNumber::new(0), 2).unwrap();
        assert_eq!(p.free_frames(), 6);
        assert_eq!(free_count(&p), p.free_frames());

        assert!(p.mark_inaccessible(FrameNumber::new(15), 2).is_err());
    }

    #[test]
    fn empty_mark_inaccessible_still_checks_the_range() {
        let m = SimulatedMachine::new(64);
        let mut p = pool(&m, 16, 16);
        let before: Vec<_> = p.states().collect();

        assert_eq!(p.mark_inaccessible(FrameNumber::new(31), 0), Ok(()));
        assert_eq!(
            p.mark_inaccessible(FrameNumber::new(32), 0),
            Err(FramePoolError::OutOfRange { first: FrameNumber::new(32), count: 0 })
        );
        assert_eq!(
            p.mark_inaccessible(FrameNumber::new(3), 0),
            Err(FramePoolError::OutOfRange { first: FrameNumber::new(3), count: 0 })
        );
        assert_eq!(p.states().collect::<Vec<_>>(), before);
        assert_eq!(p.free_frames(), 15);
    }

    #[test]
    fn pools_past_the_address_space_are_rejected() {
        let m = SimulatedMachine::new(64);
        let info = Some(FrameNumber::new(1));
        let top = unsafe { FramePool::new(&m, FrameNumber::new(0xF_FFF0), 16, info) }.unwrap();
        assert_eq!(top.end(), 0x10_0000);
        assert!(top.contains(FrameNumber::MAX));
        assert!(!top.contains(FrameNumber::new(0xF_FFEF)));

        let err = unsafe { FramePool::new(&m, FrameNumber::new(0xF_FFF0), 17, info) }.unwrap_err();
        assert_eq!(
            err,
            FramePoolError::BeyondAddressSpace { base: FrameNumber::new(0xF_FFF0), count: 17 }
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn info_frame_sizing() {
        assert_eq!(needed_info_frames(0), 0);
        assert_eq!(needed_info_frames(7168), 1);
        assert_eq!(needed_info_frames(32768), 2);
    }
}
