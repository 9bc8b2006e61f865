//! Page and frame number types.
//!
//! Page tables store frame numbers and the TLB matches on page numbers, so both get their
//! own newtype to keep them from being confused with each other or with byte addresses.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{
    address::{PhysicalAddress, VirtualAddress},
    arch,
};

/// Macro to define common page/frame number functionality.
macro_rules! impl_page_number_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new page/frame number.
            #[inline]
            pub const fn new(number: usize) -> Self {
                Self(number)
            }

            /// Returns the raw page/frame number.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_page_number_common!(
    FrameNumber,
    "A physical frame number (PFN).\n\n\
     Frame `n` covers physical addresses `n * PAGE_SIZE .. (n + 1) * PAGE_SIZE`."
);

impl FrameNumber {
    /// Returns the physical address at the start of this frame.
    #[inline]
    pub const fn start(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << arch::PAGE_SHIFT)
    }
}

impl From<PhysicalAddress> for FrameNumber {
    #[inline]
    fn from(addr: PhysicalAddress) -> Self {
        addr.frame_number()
    }
}

impl_page_number_common!(
    PageNumber,
    "A virtual page number (VPN).\n\n\
     Page `n` covers virtual addresses `n * PAGE_SIZE .. (n + 1) * PAGE_SIZE`."
);

impl PageNumber {
    /// Returns the virtual address at the start of this page.
    #[inline]
    pub const fn start(self) -> VirtualAddress {
        VirtualAddress::new(self.0 << arch::PAGE_SHIFT)
    }
}

impl From<VirtualAddress> for PageNumber {
    #[inline]
    fn from(addr: VirtualAddress) -> Self {
        addr.page_number()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_start_address() {
        assert_eq!(FrameNumber::new(3).start(), PhysicalAddress::new(0x3000));
    }

    #[test]
    fn frame_from_unaligned_address() {
        let frame = FrameNumber::from(PhysicalAddress::new(0x3000 + 10));
        assert_eq!(frame.as_usize(), 3);
    }

    #[test]
    fn page_start_address() {
        assert_eq!(PageNumber::new(0x400).start(), VirtualAddress::new(0x0040_0000));
    }

    #[test]
    fn page_arithmetic() {
        let page = PageNumber::new(10);
        assert_eq!((page + 5).as_usize(), 15);
        assert_eq!(PageNumber::new(10) - PageNumber::new(3), 7);
    }

    #[test]
    fn debug_format() {
        assert_eq!(format!("{:?}", FrameNumber::new(0x1f)), "FrameNumber(0x1f)");
    }
}
