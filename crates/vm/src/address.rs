//! Address types for physical and virtual memory.
//!
//! Both types are thin `usize` newtypes with page-alignment helpers. Construction through
//! [`PhysicalAddress::new`] / [`VirtualAddress::new`] validates the value against the
//! architecture's address widths.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{FrameNumber, PageNumber, arch};

/// Macro to define common address type functionality.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates an address without validation.
            ///
            /// # Safety
            ///
            /// The caller must ensure the value is meaningful as this kind of address. Used for
            /// host pointers in emulation, which do not fit the 32-bit layout.
            #[inline]
            pub const unsafe fn new_unchecked(addr: usize) -> Self {
                Self(addr)
            }

            /// Returns the raw address value.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Returns whether the address sits on a page boundary.
            #[inline]
            pub const fn is_page_aligned(self) -> bool {
                self.0 & !arch::PAGE_FRAME == 0
            }

            /// Rounds the address down to its page boundary.
            #[inline]
            pub const fn page_base(self) -> Self {
                Self(self.0 & arch::PAGE_FRAME)
            }

            /// Rounds the address up to the next page boundary.
            #[inline]
            pub const fn page_ceil(self) -> Self {
                Self((self.0 + arch::PAGE_SIZE - 1) & arch::PAGE_FRAME)
            }

            /// Returns the byte offset of the address within its page.
            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 & !arch::PAGE_FRAME
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

        impl From<usize> for $name {
            #[inline]
            fn from(addr: usize) -> Self {
                Self::new(addr)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self::new(self.0 + rhs)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self::Output {
                Self::new(self.0 - rhs)
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

impl_address_common!(
    PhysicalAddress,
    "A physical memory address.\n\n\
     Always lies within the direct-mapped window, so every physical address has a kernel\n\
     virtual alias."
);

impl PhysicalAddress {
    /// Creates a new physical address.
    ///
    /// # Panics
    ///
    /// Panics if the address is beyond the direct-mapped window.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            arch::validate_physical(addr),
            "physical address exceeds maximum width"
        );
        Self(addr)
    }

    /// Returns the frame containing this address.
    #[inline]
    pub const fn frame_number(self) -> FrameNumber {
        FrameNumber::new(self.0 >> arch::PAGE_SHIFT)
    }
}

impl_address_common!(
    VirtualAddress,
    "A virtual memory address.\n\n\
     User addresses lie below `KSEG0_BASE`; kernel addresses at or above it."
);

impl VirtualAddress {
    /// Creates a new virtual address.
    ///
    /// # Panics
    ///
    /// Panics if the address does not fit the 32-bit address space.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            arch::validate_virtual(addr),
            "virtual address exceeds maximum width"
        );
        Self(addr)
    }

    /// Returns the page containing this address.
    #[inline]
    pub const fn page_number(self) -> PageNumber {
        PageNumber::new(self.0 >> arch::PAGE_SHIFT)
    }

    /// Returns whether the address belongs to user space.
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 < arch::KSEG0_BASE
    }

    /// Converts the address to a pointer.
    #[inline]
    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// Converts the address to a mutable pointer.
    #[inline]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}
