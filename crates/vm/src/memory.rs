//! Access to physical memory from the kernel.
//!
//! The kernel reaches physical memory through the direct-mapped window (`KSEG0`): kernel
//! virtual address = physical address + window base. In emulation, physical memory is a
//! host buffer and "kernel virtual addresses" are host pointers into it.

use core::ptr;

#[cfg(any(test, feature = "software-emulation"))]
use crate::arch::EmulatedMemory;
use crate::{PhysicalAddress, VirtualAddress, arch};

/// Physical-to-kernel-virtual translation plus raw page access.
pub enum PhysicalMemory {
    /// Hardware translation through a direct-mapped window.
    Direct { window_base: usize },
    /// Emulated translation into a host buffer.
    #[cfg(any(test, feature = "software-emulation"))]
    Emulated(EmulatedMemory),
}

impl PhysicalMemory {
    /// Creates a translator for a direct-mapped window starting at `window_base`.
    pub const fn direct(window_base: usize) -> Self {
        Self::Direct { window_base }
    }

    /// Creates a translator for the standard `KSEG0` window.
    pub const fn kseg0() -> Self {
        Self::direct(arch::KSEG0_BASE)
    }

    /// Creates an emulated physical memory of `size` bytes, all zero.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn emulated(size: usize) -> Self {
        assert!(
            size <= arch::MAX_PHYSICAL_ADDRESS,
            "emulated memory larger than the direct-mapped window"
        );
        Self::Emulated(EmulatedMemory::new(size))
    }

    /// Returns the kernel virtual address aliasing `phys`.
    pub fn phys_to_kvaddr(&self, phys: PhysicalAddress) -> VirtualAddress {
        match self {
            Self::Direct { window_base } => VirtualAddress::new(phys.as_usize() + window_base),
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => {
                let host = mem.translate(phys.as_usize()) as usize;
                // SAFETY: host pointers are the kernel addresses of emulated memory.
                unsafe { VirtualAddress::new_unchecked(host) }
            }
        }
    }

    /// Returns the physical address behind the kernel virtual address `virt`.
    ///
    /// # Panics
    /// Panics if `virt` is not inside the direct-mapped window.
    pub fn kvaddr_to_phys(&self, virt: VirtualAddress) -> PhysicalAddress {
        match self {
            Self::Direct { window_base } => {
                assert!(
                    virt.as_usize() >= *window_base,
                    "{virt} is not a direct-mapped kernel address"
                );
                PhysicalAddress::new(virt.as_usize() - window_base)
            }
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => PhysicalAddress::new(mem.ptr_to_phys(virt.as_ptr())),
        }
    }

    /// Fills `len` bytes at `phys` with zeroes.
    ///
    /// # Safety
    /// The range must be RAM that nothing else is accessing.
    pub unsafe fn zero(&self, phys: PhysicalAddress, len: usize) {
        let dst = self.range(phys, len);
        // SAFETY: guaranteed by the caller.
        unsafe { ptr::write_bytes(dst, 0, len) };
    }

    /// Copies `len` bytes from `src` to `dst`. The ranges may overlap.
    ///
    /// # Safety
    /// Both ranges must be RAM; `dst` must not be accessed by anything else.
    pub unsafe fn copy(&self, dst: PhysicalAddress, src: PhysicalAddress, len: usize) {
        let to = self.range(dst, len);
        let from = self.range(src, len);
        // SAFETY: guaranteed by the caller.
        unsafe { ptr::copy(from, to, len) };
    }

    /// Reads `buf.len()` bytes starting at `phys`.
    ///
    /// # Safety
    /// The range must be RAM that nothing is concurrently writing.
    pub unsafe fn read(&self, phys: PhysicalAddress, buf: &mut [u8]) {
        let from = self.range(phys, buf.len());
        // SAFETY: guaranteed by the caller; `buf` is a distinct Rust allocation.
        unsafe { ptr::copy_nonoverlapping(from, buf.as_mut_ptr(), buf.len()) };
    }

    /// Writes `data` starting at `phys`.
    ///
    /// # Safety
    /// The range must be RAM that nothing else is accessing.
    pub unsafe fn write(&self, phys: PhysicalAddress, data: &[u8]) {
        let to = self.range(phys, data.len());
        // SAFETY: guaranteed by the caller; `data` is a distinct Rust allocation.
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), to, data.len()) };
    }

    /// Returns a typed kernel pointer to physical address `phys`, valid for `count` values.
    pub(crate) fn typed<T>(&self, phys: PhysicalAddress, count: usize) -> *mut T {
        self.range(phys, count * core::mem::size_of::<T>()).cast()
    }

    #[cfg_attr(
        not(any(test, feature = "software-emulation")),
        allow(unused_variables)
    )]
    fn range(&self, phys: PhysicalAddress, len: usize) -> *mut u8 {
        match self {
            Self::Direct { .. } => self.phys_to_kvaddr(phys).as_mut_ptr(),
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => mem.range(phys.as_usize(), len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_window_translation() {
        let memory = PhysicalMemory::kseg0();
        let phys = PhysicalAddress::new(0x0002_3000);
        let virt = memory.phys_to_kvaddr(phys);
        assert_eq!(virt, VirtualAddress::new(0x8002_3000));
        assert_eq!(memory.kvaddr_to_phys(virt), phys);
    }

    #[test]
    #[should_panic(expected = "is not a direct-mapped kernel address")]
    fn direct_window_rejects_user_address() {
        let memory = PhysicalMemory::kseg0();
        memory.kvaddr_to_phys(VirtualAddress::new(0x0040_0000));
    }

    #[test]
    fn emulated_translation_round_trip() {
        let memory = PhysicalMemory::emulated(4 * arch::PAGE_SIZE);
        let phys = PhysicalAddress::new(2 * arch::PAGE_SIZE);
        let virt = memory.phys_to_kvaddr(phys);
        assert_eq!(memory.kvaddr_to_phys(virt), phys);
    }

    #[test]
    fn write_read_zero_copy() {
        let memory = PhysicalMemory::emulated(4 * arch::PAGE_SIZE);
        let a = PhysicalAddress::new(0);
        let b = PhysicalAddress::new(arch::PAGE_SIZE);
        let mut buf = [0u8; 4];

        unsafe {
            memory.write(a + 8, b"page");
            memory.copy(b, a, arch::PAGE_SIZE);
            memory.read(b + 8, &mut buf);
        }
        assert_eq!(&buf, b"page");

        unsafe {
            memory.zero(b, arch::PAGE_SIZE);
            memory.read(b + 8, &mut buf);
        }
        assert_eq!(buf, [0; 4]);
    }
}
