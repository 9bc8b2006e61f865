//! Early-boot frame stealing.
//!
//! Before the frame pool exists the kernel still needs memory: for the pool's own descriptor
//! array, and for any other structures built before the VM system is up. The boot allocator
//! hands out frames by bumping a cursor through raw RAM. Stolen frames are never returned.
//!
//! [`FramePool::bootstrap`](crate::FramePool::bootstrap) consumes the boot allocator, so once
//! the pool is running there is no way left to steal frames behind its back.

use crate::{PhysicalAddress, arch::PAGE_SIZE};

/// The physical RAM extent reported by the platform at boot.
///
/// `low` is the first free byte after the kernel image and `high` is one past the last byte
/// of RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamExtent {
    low: PhysicalAddress,
    high: PhysicalAddress,
}

impl RamExtent {
    /// Creates a new RAM extent.
    ///
    /// # Panics
    /// Panics if `high` is below `low`.
    pub const fn new(low: PhysicalAddress, high: PhysicalAddress) -> Self {
        assert!(
            high.as_usize() >= low.as_usize(),
            "RAM extent ends before it starts"
        );
        Self { low, high }
    }

    /// Returns the first usable physical address.
    pub const fn low(&self) -> PhysicalAddress {
        self.low
    }

    /// Returns one past the last usable physical address.
    pub const fn high(&self) -> PhysicalAddress {
        self.high
    }

    /// Returns the size of the extent in bytes.
    pub const fn size(&self) -> usize {
        self.high.as_usize() - self.low.as_usize()
    }
}

/// One-way frame allocator for use before the frame pool is bootstrapped.
#[derive(Debug)]
pub struct BootAllocator {
    next: PhysicalAddress,
    end: PhysicalAddress,
}

impl BootAllocator {
    /// Creates a boot allocator over `ram`.
    ///
    /// The extent is shrunk to whole frames: the start is rounded up and the end rounded down.
    pub fn new(ram: RamExtent) -> Self {
        let next = ram.low().page_ceil();
        let end = ram.high().page_base();
        Self {
            next,
            end: if end < next { next } else { end },
        }
    }

    /// Steals `count` contiguous frames, returning the physical address of the first.
    ///
    /// Returns `None` if fewer than `count` frames remain.
    pub fn steal_frames(&mut self, count: usize) -> Option<PhysicalAddress> {
        if count > self.remaining_frames() {
            log::error!(
                "boot allocator exhausted: wanted {} frames, {} left",
                count,
                self.remaining_frames()
            );
            return None;
        }

        let base = self.next;
        self.next = base + count * PAGE_SIZE;
        Some(base)
    }

    /// Returns the next address the allocator would hand out.
    pub fn next_free(&self) -> PhysicalAddress {
        self.next
    }

    /// Returns the number of frames not yet stolen.
    pub fn remaining_frames(&self) -> usize {
        (self.end - self.next) / PAGE_SIZE
    }

    /// Gives up the allocator, returning the untouched part of RAM.
    pub(crate) fn into_remaining(self) -> RamExtent {
        RamExtent::new(self.next, self.end)
    }
}
