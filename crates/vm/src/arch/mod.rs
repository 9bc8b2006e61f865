//! Architecture constants and backends.
//!
//! The address layout is that of a 32-bit MIPS-style machine with a software-refilled TLB:
//! user space lives below `KSEG0_BASE`, and the first 512 MiB of physical memory are
//! direct-mapped into the kernel window starting at `KSEG0_BASE`.
//!
//! Interrupt masking comes from the host architecture. When testing, or when the
//! `software-emulation` feature is enabled, RAM, the TLB and interrupt masking are all emulated.

// NOTE: We DO include the module even during tests so that rust-analyzer can see it.
#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use x86_64::HardwareInterrupts;

#[cfg(any(test, feature = "software-emulation"))]
mod software;
#[cfg(any(test, feature = "software-emulation"))]
pub use software::{EmulatedMemory, SoftwareInterrupts, SoftwareTlb};

/// Page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Mask selecting the page-number bits of an address.
pub const PAGE_FRAME: usize = !(PAGE_SIZE - 1);

/// Number of bits in the page offset.
pub const PAGE_SHIFT: usize = 12;

/// Start of the direct-mapped kernel window.
pub const KSEG0_BASE: usize = 0x8000_0000;

/// End of the direct-mapped window: one past the last physical byte the kernel can reach.
///
/// Valid as a physical address only as an end bound.
pub const MAX_PHYSICAL_ADDRESS: usize = 0x2000_0000;

/// Highest virtual address (inclusive) of the 32-bit address space.
pub const MAX_VIRTUAL_ADDRESS: usize = 0xFFFF_FFFF;

/// Top of every user stack; the initial stack pointer handed to new processes.
pub const USER_STACK: usize = KSEG0_BASE;

/// Number of pages in every user stack (48 KiB). Stacks never grow.
pub const STACK_PAGES: usize = 12;

/// Number of slots in the TLB.
pub const TLB_SLOTS: usize = 64;

/// Validates a physical address.
///
/// Physical addresses must be reachable through the direct-mapped kernel window.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    addr <= MAX_PHYSICAL_ADDRESS
}

/// Validates a virtual address.
///
/// Virtual addresses must fit in 32 bits.
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    addr <= MAX_VIRTUAL_ADDRESS
}
