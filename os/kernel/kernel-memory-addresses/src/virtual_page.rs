use crate::{PAGE_SHIFT, VirtualAddress};
use core::fmt;
use core::ops::Add;

/// Virtual page number (`virtual address >> 12`).
///
/// ```rust
/// # use kernel_memory_addresses::*;
/// let vp = VirtualPage::containing(VirtualAddress::new(0x0800_0500));
/// assert_eq!(vp.base().as_u32(), 0x0800_0000);
/// assert_eq!((vp + 1).base().as_u32(), 0x0800_1000);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(u32);

impl VirtualPage {
    #[inline]
    #[must_use]
    pub const fn new(number: u32) -> Self {
        debug_assert!(number < (1 << (32 - PAGE_SHIFT)));
        Self(number)
    }

    /// Page that contains `addr` (aligns down to page boundary).
    #[inline]
    #[must_use]
    pub const fn containing(addr: VirtualAddress) -> Self {
        Self(addr.as_u32() >> PAGE_SHIFT)
    }

    /// The page number.
    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new(self.0 << PAGE_SHIFT)
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VP(0x{:05X})", self.0)
    }
}

impl fmt::Display for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base())
    }
}

impl Add<u32> for VirtualPage {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self::new(self.0 + rhs)
    }
}
