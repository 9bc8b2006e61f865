//! Software-refilled TLB entries and the TLB hardware seam.
//!
//! An entry is two 32-bit words. `EntryHi` holds the virtual page number in its top 20 bits;
//! `EntryLo` holds the physical frame number in its top 20 bits and the flag bits below.

use core::fmt;

use crate::{FrameNumber, PageNumber, arch::PAGE_SHIFT};

bitflags::bitflags! {
    /// Flag bits of `EntryLo`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TlbFlags: u32 {
        /// Accesses through this entry bypass the cache.
        const NOCACHE = 1 << 11;
        /// Writes are permitted. A write through an entry without this bit raises a
        /// read-only fault.
        const DIRTY = 1 << 10;
        /// The entry takes part in translation.
        const VALID = 1 << 9;
        /// The entry matches regardless of address space id.
        const GLOBAL = 1 << 8;
    }
}

impl TlbFlags {
    /// Valid and read-only.
    pub const fn valid() -> Self {
        Self::VALID
    }

    /// Valid and writable.
    pub const fn valid_dirty() -> Self {
        Self::VALID.union(Self::DIRTY)
    }
}

/// Base page of the unmapped kernel segment. Invalidated slots point here so that no user
/// address can ever match them, and each slot gets its own page so no two slots collide.
const INVALID_HI_BASE: u32 = 0x80000;

const PAGE_MASK: u32 = !((1 << PAGE_SHIFT) - 1);

/// One TLB slot: `EntryHi` and `EntryLo`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TlbEntry {
    hi: u32,
    lo: u32,
}

impl TlbEntry {
    /// Creates an entry mapping `page` to `frame`.
    pub const fn new(page: PageNumber, frame: FrameNumber, flags: TlbFlags) -> Self {
        Self {
            hi: (page.as_usize() as u32) << PAGE_SHIFT,
            lo: ((frame.as_usize() as u32) << PAGE_SHIFT) | flags.bits(),
        }
    }

    /// The canonical invalid entry for `slot`.
    pub const fn invalid(slot: usize) -> Self {
        Self {
            hi: (INVALID_HI_BASE + slot as u32) << PAGE_SHIFT,
            lo: 0,
        }
    }

    /// Builds an entry from raw `EntryHi`/`EntryLo` words.
    pub const fn from_raw(hi: u32, lo: u32) -> Self {
        Self { hi, lo }
    }

    pub const fn hi(&self) -> u32 {
        self.hi
    }

    pub const fn lo(&self) -> u32 {
        self.lo
    }

    /// Returns the virtual page this entry matches.
    pub const fn page(&self) -> PageNumber {
        PageNumber::new(((self.hi & PAGE_MASK) >> PAGE_SHIFT) as usize)
    }

    /// Returns the physical frame this entry maps to.
    pub const fn frame(&self) -> FrameNumber {
        FrameNumber::new(((self.lo & PAGE_MASK) >> PAGE_SHIFT) as usize)
    }

    pub const fn flags(&self) -> TlbFlags {
        TlbFlags::from_bits_truncate(self.lo)
    }

    pub const fn is_valid(&self) -> bool {
        self.flags().contains(TlbFlags::VALID)
    }

    pub const fn is_writable(&self) -> bool {
        self.flags().contains(TlbFlags::DIRTY)
    }
}

impl fmt::Debug for TlbEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlbEntry")
            .field("page", &self.page())
            .field("frame", &self.frame())
            .field("flags", &self.flags())
            .finish()
    }
}

/// The TLB as the refill handler sees it.
///
/// Implementations perform no locking and no interrupt masking; callers wrap every access in
/// an interrupt guard and the TLB lock.
pub trait Tlb {
    /// Returns the number of slots.
    fn slots(&self) -> usize;

    /// Reads the entry in `slot`.
    fn read(&self, slot: usize) -> TlbEntry;

    /// Overwrites the entry in `slot`.
    fn write(&mut self, slot: usize, entry: TlbEntry);

    /// Writes `entry` into a slot chosen by the hardware, returning the slot used.
    fn write_random(&mut self, entry: TlbEntry) -> usize;

    /// Returns the slot whose `EntryHi` matches `page`, if any.
    ///
    /// Matches on the page alone, valid or not, like the hardware probe.
    fn probe(&self, page: PageNumber) -> Option<usize> {
        (0..self.slots()).find(|&slot| self.read(slot).page() == page)
    }

    /// Returns the first slot not holding a valid entry.
    fn first_invalid(&self) -> Option<usize> {
        (0..self.slots()).find(|&slot| !self.read(slot).is_valid())
    }

    /// Invalidates every slot.
    fn invalidate_all(&mut self) {
        for slot in 0..self.slots() {
            self.write(slot, TlbEntry::invalid(slot));
        }
    }
}
