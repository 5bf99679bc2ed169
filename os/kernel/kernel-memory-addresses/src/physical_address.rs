use crate::{FrameNumber, PAGE_OFFSET_MASK, PAGE_SHIFT};
use core::fmt;
use core::ops::Add;

/// Physical memory address.
///
/// Denotes a byte in host RAM (or MMIO). Carries intent and prevents
/// accidental VA↔PA mix-ups; use [`PhysicalAddress::frame`] and
/// [`PhysicalAddress::offset`] to split it into frame number and in-frame
/// offset.
///
/// ```rust
/// # use kernel_memory_addresses::*;
/// let pa = PhysicalAddress::new(0x0040_1042);
/// assert_eq!(pa.frame(), FrameNumber::new(0x401));
/// assert_eq!(pa.offset(), 0x42);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u32);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// The frame containing this address.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> FrameNumber {
        FrameNumber::new(self.0 >> PAGE_SHIFT)
    }

    /// Byte offset inside the containing frame.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> u32 {
        self.0 & PAGE_OFFSET_MASK
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:08X})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl Add<u32> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0.wrapping_add(rhs))
    }
}
