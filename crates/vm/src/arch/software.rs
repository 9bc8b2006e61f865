//! Software emulation for testing and development.
//!
//! Provides host-side stand-ins for the three pieces of hardware the subsystem touches:
//! physical RAM, the TLB and the local interrupt mask. None of them require privileges, so
//! the whole subsystem can run inside `cargo test`.

use alloc::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{PAGE_SIZE, TLB_SLOTS};
use crate::{InterruptControl, Tlb, TlbEntry};

/// Emulated physical memory.
///
/// Physical address `n` is byte `n` of a zero-initialised, page-aligned host buffer.
pub struct EmulatedMemory {
    base: NonNull<u8>,
    layout: Layout,
}

// SAFETY: The buffer is exclusively owned by this value and only reached through raw pointers
// handed out by `range`; synchronising access to the bytes is the caller's responsibility,
// exactly as it is for real RAM.
unsafe impl Send for EmulatedMemory {}
unsafe impl Sync for EmulatedMemory {}

impl EmulatedMemory {
    /// Creates a new emulated memory region of the specified size.
    ///
    /// # Panics
    /// Panics if `size` is zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "emulated memory must not be empty");
        let layout = match Layout::from_size_align(size, PAGE_SIZE) {
            Ok(layout) => layout,
            Err(_) => panic!("invalid emulated memory size {size:#x}"),
        };
        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(base) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };
        Self { base, layout }
    }

    /// Returns a host pointer to `len` bytes starting at physical address `phys`.
    ///
    /// # Panics
    /// Panics if the range does not lie entirely within the emulated memory.
    pub fn range(&self, phys: usize, len: usize) -> *mut u8 {
        let end = phys.checked_add(len);
        assert!(
            matches!(end, Some(end) if end <= self.size()),
            "physical range {phys:#x}+{len:#x} out of bounds"
        );
        // SAFETY: the assertion keeps the offset within the allocation.
        unsafe { self.base.as_ptr().add(phys) }
    }

    /// Translates a physical address to a host pointer.
    pub fn translate(&self, phys: usize) -> *mut u8 {
        self.range(phys, 1)
    }

    /// Translates a host pointer back to a physical address.
    ///
    /// # Panics
    /// Panics if the pointer does not point into the emulated memory.
    pub fn ptr_to_phys(&self, ptr: *const u8) -> usize {
        let offset = (ptr as usize).wrapping_sub(self.base.as_ptr() as usize);
        assert!(offset < self.size(), "pointer not within emulated memory");
        offset
    }

    /// Returns the size of the emulated memory region.
    pub fn size(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for EmulatedMemory {
    fn drop(&mut self) {
        // SAFETY: `base` was allocated in `new` with exactly this layout.
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}

/// An emulated software-refilled TLB.
///
/// Slots start out invalid. Random replacement uses a xorshift generator, standing in for
/// the hardware `Random` register.
pub struct SoftwareTlb {
    slots: [TlbEntry; TLB_SLOTS],
    seed: u32,
}

impl SoftwareTlb {
    /// Creates a TLB with every slot invalid.
    pub fn new() -> Self {
        Self::with_seed(0x2545_F491)
    }

    /// Creates a TLB whose random replacement sequence starts from `seed`.
    pub fn with_seed(seed: u32) -> Self {
        Self {
            slots: core::array::from_fn(TlbEntry::invalid),
            seed: seed.max(1),
        }
    }

    /// Returns the number of valid slots.
    pub fn valid_entries(&self) -> usize {
        self.slots.iter().filter(|entry| entry.is_valid()).count()
    }

    fn next_random(&mut self) -> u32 {
        let mut x = self.seed;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.seed = x;
        x
    }
}

impl Default for SoftwareTlb {
    fn default() -> Self {
        Self::new()
    }
}

impl Tlb for SoftwareTlb {
    fn slots(&self) -> usize {
        TLB_SLOTS
    }

    fn read(&self, slot: usize) -> TlbEntry {
        self.slots[slot]
    }

    fn write(&mut self, slot: usize, entry: TlbEntry) {
        self.slots[slot] = entry;
    }

    fn write_random(&mut self, entry: TlbEntry) -> usize {
        let slot = self.next_random() as usize % TLB_SLOTS;
        self.slots[slot] = entry;
        slot
    }
}

/// Emulated local interrupt mask.
///
/// Records how many times interrupts were disabled so tests can check the fault path
/// masks them around TLB writes.
pub struct SoftwareInterrupts {
    enabled: AtomicBool,
    disables: AtomicUsize,
}

impl SoftwareInterrupts {
    /// Creates the emulated mask with interrupts enabled.
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            disables: AtomicUsize::new(0),
        }
    }

    /// Returns whether interrupts are currently enabled.
    pub fn are_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Returns how many times interrupts have been disabled.
    pub fn disable_count(&self) -> usize {
        self.disables.load(Ordering::Acquire)
    }
}

impl Default for SoftwareInterrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptControl for SoftwareInterrupts {
    fn disable(&self) -> bool {
        self.disables.fetch_add(1, Ordering::AcqRel);
        self.enabled.swap(false, Ordering::AcqRel)
    }

    fn restore(&self, was_enabled: bool) {
        if was_enabled {
            self.enabled.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameNumber, PageNumber, TlbFlags};

    #[test]
    fn emulated_memory_starts_zeroed() {
        let memory = EmulatedMemory::new(64);
        let ptr = memory.range(0, 64);
        let bytes = unsafe { core::slice::from_raw_parts(ptr, 64) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn emulated_memory_is_page_aligned() {
        let memory = EmulatedMemory::new(2 * PAGE_SIZE);
        assert_eq!(memory.range(0, 1) as usize % PAGE_SIZE, 0);
    }

    #[test]
    fn emulated_memory_pointer_round_trip() {
        let memory = EmulatedMemory::new(128);
        let ptr = memory.translate(40);
        assert_eq!(memory.ptr_to_phys(ptr), 40);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn emulated_memory_rejects_overrun() {
        let memory = EmulatedMemory::new(128);
        memory.range(120, 16);
    }

    #[test]
    fn tlb_starts_invalid() {
        let tlb = SoftwareTlb::new();
        assert_eq!(tlb.valid_entries(), 0);
        assert_eq!(tlb.slots(), TLB_SLOTS);
    }

    #[test]
    fn random_write_lands_in_range() {
        let mut tlb = SoftwareTlb::with_seed(7);
        let entry = TlbEntry::new(PageNumber::new(3), FrameNumber::new(9), TlbFlags::valid());
        for _ in 0..200 {
            let slot = tlb.write_random(entry);
            assert!(slot < TLB_SLOTS);
            assert_eq!(tlb.read(slot), entry);
        }
    }

    #[test]
    fn interrupts_disable_and_restore() {
        let irq = SoftwareInterrupts::new();
        let was = irq.disable();
        assert!(was);
        assert!(!irq.are_enabled());

        // nested disable sees them already off
        let inner = irq.disable();
        assert!(!inner);
        irq.restore(inner);
        assert!(!irq.are_enabled());

        irq.restore(was);
        assert!(irq.are_enabled());
        assert_eq!(irq.disable_count(), 2);
    }
}
