//! # Frame Pool Registry
//!
//! Owns every [`FramePool`] in the system. Pools are appended at boot and
//! never removed. An index sorted by base frame lets [`FramePoolRegistry::release`]
//! find the owning pool with a binary search, so callers can give frames
//! back without knowing where they came from.

use crate::frame_pool::{FramePool, FramePoolError};
use kernel_info::memory::MAX_FRAME_POOLS;
use kernel_memory_addresses::FrameNumber;
use log::{info, warn};

/// Handle of a registered pool.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PoolId(u8);

impl PoolId {
    #[cfg(test)]
    pub(crate) const fn new(raw: u8) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Entry of the sorted ownership index.
#[derive(Copy, Clone)]
struct OwnerEntry {
    base: FrameNumber,
    /// One past the last frame; may exceed [`FrameNumber::MAX`] by one.
    end: u32,
    id: PoolId,
}

impl OwnerEntry {
    const EMPTY: Self = Self {
        base: FrameNumber::new(0),
        end: 0,
        id: PoolId(0),
    };
}

/// Fixed-capacity set of frame pools.
pub struct FramePoolRegistry {
    pools: [Option<FramePool>; MAX_FRAME_POOLS],
    by_base: [OwnerEntry; MAX_FRAME_POOLS],
    len: usize,
}

impl FramePoolRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pools: [const { None }; MAX_FRAME_POOLS],
            by_base: [OwnerEntry::EMPTY; MAX_FRAME_POOLS],
            len: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Add a pool.
    ///
    /// # Errors
    /// [`FramePoolError::RegistryFull`] or, if the pool's frames intersect a
    /// registered pool, [`FramePoolError::OverlappingPools`].
    pub fn register(&mut self, pool: FramePool) -> Result<PoolId, FramePoolError> {
        if self.len == MAX_FRAME_POOLS {
            warn!("frame pool registry: no slot for pool at {}", pool.base());
            return Err(FramePoolError::RegistryFull);
        }
        if self.iter().any(|(_, other)| other.overlaps(&pool)) {
            warn!("frame pool registry: pool at {} overlaps", pool.base());
            return Err(FramePoolError::OverlappingPools { base: pool.base() });
        }

        #[allow(clippy::cast_possible_truncation)]
        let id = PoolId(self.len as u8);
        let entry = OwnerEntry {
            base: pool.base(),
            end: pool.end(),
            id,
        };

        let pos = self.sorted().partition_point(|e| e.base < entry.base);
        self.by_base.copy_within(pos..self.len, pos + 1);
        self.by_base[pos] = entry;

        info!(
            "frame pool registry: {id:?} owns frames {}..{}",
            entry.base, entry.end
        );
        self.pools[self.len] = Some(pool);
        self.len += 1;
        Ok(id)
    }

    fn sorted(&self) -> &[OwnerEntry] {
        &self.by_base[..self.len]
    }

    /// The pool that owns `frame`, in O(log p).
    #[must_use]
    pub fn owner_of(&self, frame: FrameNumber) -> Option<PoolId> {
        let sorted = self.sorted();
        let after = sorted.partition_point(|e| e.base <= frame);
        let candidate = sorted.get(after.checked_sub(1)?)?;
        (frame.as_u32() < candidate.end).then_some(candidate.id)
    }

    #[must_use]
    pub fn pool(&self, id: PoolId) -> Option<&FramePool> {
        self.pools.get(id.as_usize())?.as_ref()
    }

    #[must_use]
    pub fn pool_mut(&mut self, id: PoolId) -> Option<&mut FramePool> {
        self.pools.get_mut(id.as_usize())?.as_mut()
    }

    /// Registered pools in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (PoolId, &FramePool)> + '_ {
        self.pools[..self.len]
            .iter()
            .enumerate()
            .filter_map(|(i, p)| {
                #[allow(clippy::cast_possible_truncation)]
                let id = PoolId(i as u8);
                p.as_ref().map(|p| (id, p))
            })
    }

    /// Free frames across all pools.
    #[must_use]
    pub fn free_frames(&self) -> u32 {
        self.iter().map(|(_, p)| p.free_frames()).sum()
    }

    /// Allocate `n` contiguous frames from pool `id`.
    ///
    /// # Errors
    /// [`FramePoolError::UnknownPool`] or the pool's allocation error.
    pub fn get_frames(&mut self, id: PoolId, n: u32) -> Result<FrameNumber, FramePoolError> {
        self.pool_mut(id)
            .ok_or(FramePoolError::UnknownPool)?
            .get_frames(n)
    }

    /// Reserve a range in pool `id`.
    ///
    /// # Errors
    /// [`FramePoolError::UnknownPool`] or [`FramePoolError::OutOfRange`].
    pub fn mark_inaccessible(
        &mut self,
        id: PoolId,
        first: FrameNumber,
        n: u32,
    ) -> Result<(), FramePoolError> {
        self.pool_mut(id)
            .ok_or(FramePoolError::UnknownPool)?
            .mark_inaccessible(first, n)
    }

    /// Release the run starting at `first`, whichever pool owns it.
    ///
    /// # Errors
    /// [`FramePoolError::UnknownFrame`] if no pool owns the frame,
    /// [`FramePoolError::NotHeadOfSequence`] if no run starts there.
    pub fn release(&mut self, first: FrameNumber) -> Result<u32, FramePoolError> {
        let Some(id) = self.owner_of(first) else {
            warn!("frame pool registry: frame {first} has no owner");
            return Err(FramePoolError::UnknownFrame(first));
        };
        self.pool_mut(id)
            .ok_or(FramePoolError::UnknownPool)?
            .release_run(first)
    }
}

impl Default for FramePoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_pool::FrameState;
    use kernel_vmem::sim::SimulatedMachine;

    fn pool(m: &SimulatedMachine, base: u32, count: u32) -> FramePool {
        unsafe { FramePool::new(m, FrameNumber::new(base), count, None) }.unwrap()
    }

    /// Pool whose bitmap lives in frame `info`, leaving all its frames free.
    fn hosted(m: &SimulatedMachine, base: u32, count: u32, info: u32) -> FramePool {
        unsafe { FramePool::new(m, FrameNumber::new(base), count, Some(FrameNumber::new(info))) }
            .unwrap()
    }

    /// Pools registered out of address order: [40, 48), [8, 16), [16, 24),
    /// with their bitmaps in frames 1 to 3.
    fn registry(m: &SimulatedMachine) -> (FramePoolRegistry, [PoolId; 3]) {
        let mut r = FramePoolRegistry::new();
        let high = r.register(hosted(m, 40, 8, 1)).unwrap();
        let low = r.register(hosted(m, 8, 8, 2)).unwrap();
        let mid = r.register(hosted(m, 16, 8, 3)).unwrap();
        (r, [low, mid, high])
    }

    #[test]
    fn ownership_at_pool_edges() {
        let m = SimulatedMachine::new(64);
        let (r, [low, mid, high]) = registry(&m);

        assert_eq!(r.owner_of(FrameNumber::new(7)), None);
        assert_eq!(r.owner_of(FrameNumber::new(8)), Some(low));
        assert_eq!(r.owner_of(FrameNumber::new(15)), Some(low));
        assert_eq!(r.owner_of(FrameNumber::new(16)), Some(mid));
        assert_eq!(r.owner_of(FrameNumber::new(23)), Some(mid));
        assert_eq!(r.owner_of(FrameNumber::new(24)), None);
        assert_eq!(r.owner_of(FrameNumber::new(39)), None);
        assert_eq!(r.owner_of(FrameNumber::new(40)), Some(high));
        assert_eq!(r.owner_of(FrameNumber::new(47)), Some(high));
        assert_eq!(r.owner_of(FrameNumber::new(48)), None);
    }

    #[test]
    fn release_routes_runs_to_owner() {
        let m = SimulatedMachine::new(64);
        let (mut r, [low, mid, high]) = registry(&m);

        let a = r.get_frames(low, 7).unwrap();
        let b = r.get_frames(mid, 8).unwrap();
        let c = r.get_frames(high, 1).unwrap();
        assert_eq!((a.as_u32(), b.as_u32(), c.as_u32()), (8, 16, 40));
        assert_eq!(r.free_frames(), 8);

        assert_eq!(r.release(b).unwrap(), 8);
        assert_eq!(r.pool(mid).unwrap().free_frames(), 8);
        assert_eq!(r.pool(low).unwrap().free_frames(), 1);
        assert_eq!(r.release(a).unwrap(), 7);
        assert_eq!(r.release(c).unwrap(), 1);
        assert_eq!(r.free_frames(), 24);
    }

    #[test]
    fn release_at_pool_edges() {
        let m = SimulatedMachine::new(64);
        let (mut r, [low, mid, high]) = registry(&m);
        for id in [low, mid, high] {
            while r.get_frames(id, 1).is_ok() {}
        }
        assert_eq!(r.free_frames(), 0);

        let edges = [(8, low), (15, low), (16, mid), (23, mid), (40, high), (47, high)];
        for (frame, owner) in edges {
            let frame = FrameNumber::new(frame);
            let before = r.pool(owner).unwrap().free_frames();
            assert_eq!(r.release(frame), Ok(1));
            assert_eq!(r.pool(owner).unwrap().free_frames(), before + 1);
            assert_eq!(r.pool(owner).unwrap().state(frame), Some(FrameState::Free));
        }
        assert_eq!(r.free_frames(), 6);

        for outside in [7, 24, 39, 48] {
            let frame = FrameNumber::new(outside);
            assert_eq!(r.release(frame), Err(FramePoolError::UnknownFrame(frame)));
        }
    }

    #[test]
    fn pool_at_the_top_of_memory() {
        let m = SimulatedMachine::new(64);
        let mut r = FramePoolRegistry::new();
        let top = unsafe {
            FramePool::new(&m, FrameNumber::new(0xF_FFF0), 16, Some(FrameNumber::new(1)))
        }
        .unwrap();
        assert_eq!(top.end(), 0x10_0000);
        let id = r.register(top).unwrap();

        assert_eq!(r.owner_of(FrameNumber::MAX), Some(id));
        assert_eq!(r.owner_of(FrameNumber::new(0xF_FFEF)), None);
        while r.get_frames(id, 1).is_ok() {}
        assert_eq!(r.release(FrameNumber::MAX), Ok(1));

        let overlapping = unsafe {
            FramePool::new(&m, FrameNumber::new(0xF_FFF8), 8, Some(FrameNumber::new(2)))
        }
        .unwrap();
        assert_eq!(
            r.register(overlapping).unwrap_err(),
            FramePoolError::OverlappingPools { base: FrameNumber::new(0xF_FFF8) }
        );
    }

    #[test]
    fn release_of_foreign_frame_fails() {
        let m = SimulatedMachine::new(64);
        let (mut r, _) = registry(&m);
        assert_eq!(
            r.release(FrameNumber::new(30)),
            Err(FramePoolError::UnknownFrame(FrameNumber::new(30)))
        );
    }

    #[test]
    fn overlapping_pools_are_rejected() {
        let m = SimulatedMachine::new(64);
        let (mut r, _) = registry(&m);
        let err = r.register(pool(&m, 20, 4)).unwrap_err();
        assert_eq!(err, FramePoolError::OverlappingPools { base: FrameNumber::new(20) });
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn capacity_is_bounded() {
        let m = SimulatedMachine::new(64);
        let mut r = FramePoolRegistry::new();
        for i in 0..MAX_FRAME_POOLS {
            let base = u32::try_from(i).unwrap() * 4;
            r.register(pool(&m, base, 4)).unwrap();
        }
        assert_eq!(
            r.register(pool(&m, 60, 4)).unwrap_err(),
            FramePoolError::RegistryFull
        );
        assert_eq!(r.iter().count(), MAX_FRAME_POOLS);
    }

    #[test]
    fn unknown_pool_id() {
        let r_empty = FramePoolRegistry::new();
        assert!(r_empty.pool(PoolId(3)).is_none());
        let mut r = FramePoolRegistry::default();
        assert_eq!(r.get_frames(PoolId(0), 1), Err(FramePoolError::UnknownPool));
    }
}
