use crate::{PAGE_SHIFT, PhysicalAddress};
use core::fmt;
use core::ops::{Add, Sub};

/// Physical frame number (`physical address >> 12`).
///
/// Frame numbers are what the frame pools hand out and what page-table
/// entries store in their upper twenty bits.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FrameNumber(u32);

impl FrameNumber {
    /// Largest representable frame number on a 32-bit physical bus.
    pub const MAX: Self = Self((1 << (32 - PAGE_SHIFT)) - 1);

    /// Construct from a raw frame number.
    ///
    /// ### Debug assertions
    /// - Asserts the frame fits in 20 bits.
    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        debug_assert!(v <= Self::MAX.0);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Physical address of the first byte of the frame.
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << PAGE_SHIFT)
    }

    /// Number of frames from `origin` to `self`, if `self` is not below it.
    #[inline]
    #[must_use]
    pub const fn checked_offset_from(self, origin: Self) -> Option<u32> {
        self.0.checked_sub(origin.0)
    }
}

impl fmt::Debug for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", self.0)
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for FrameNumber {
    #[inline]
    fn from(v: u32) -> Self {
        Self::new(v)
    }
}

impl Add<u32> for FrameNumber {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Sub<Self> for FrameNumber {
    type Output = u32;
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_and_address_agree() {
        let f = FrameNumber::new(0x401);
        assert_eq!(f.base().as_u32(), 0x0040_1000);
        assert_eq!(PhysicalAddress::new(0x0040_1FFF).frame(), f);
        assert_eq!(PhysicalAddress::new(0x0040_1042).frame(), f);
    }

    #[test]
    fn offsets_between_frames() {
        let a = FrameNumber::new(1024);
        let b = FrameNumber::new(1030);
        assert_eq!(b - a, 6);
        assert_eq!(b.checked_offset_from(a), Some(6));
        assert_eq!(a.checked_offset_from(b), None);
        assert_eq!(a + 6, b);
    }

    #[test]
    fn max_frame_is_last_4k_frame() {
        assert_eq!(FrameNumber::MAX.base().as_u32(), 0xFFFF_F000);
    }
}
