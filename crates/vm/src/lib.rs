#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Teaching-kernel virtual memory
//!
//! A deliberately small VM subsystem for a single-core kernel on a software-refilled TLB:
//!
//! - An early-boot frame stealer and the coremap frame pool built on top of it.
//! - Per-process address spaces with two general regions and a fixed stack, backed by flat
//!   page tables that are fully populated before the process runs.
//! - A TLB refill handler that installs translations from those tables, plus the
//!   context-switch and shootdown hooks.
//!
//! With the `software-emulation` feature (or under test) RAM, the TLB and the interrupt mask
//! are emulated on the host, and [`Mmu`] drives user accesses through the real fault path.

extern crate alloc;

mod address;
mod address_space;
mod arch;
mod boot_allocator;
mod config;
mod fault;
mod frame;
mod frame_pool;
mod interrupts;
mod memory;
#[cfg(any(test, feature = "software-emulation"))]
mod mmu;
mod numbers;
mod page_table;
mod tlb;
mod vm;

pub use address::{PhysicalAddress, VirtualAddress};
pub use address_space::{AddressSpace, AddressSpaceId, Permissions, RegionKind, VmError};
pub use boot_allocator::{BootAllocator, RamExtent};
pub use config::{TextProtection, VmConfig};
pub use fault::{FaultError, FaultKind};
pub use frame::FrameDescriptor;
pub use frame_pool::{AllocError, FramePool};
pub use interrupts::{InterruptControl, InterruptGuard};
pub use memory::PhysicalMemory;
#[cfg(any(test, feature = "software-emulation"))]
pub use mmu::{Access, Mmu};
pub use numbers::{FrameNumber, PageNumber};
pub use page_table::{PageTable, Region};
pub use tlb::{Tlb, TlbEntry, TlbFlags};
pub use vm::{Process, TlbShootdown, Vm};

pub use arch::{KSEG0_BASE, PAGE_SIZE, STACK_PAGES, TLB_SLOTS, USER_STACK};
#[cfg(target_arch = "x86_64")]
pub use arch::HardwareInterrupts;
#[cfg(any(test, feature = "software-emulation"))]
pub use arch::{EmulatedMemory, SoftwareInterrupts, SoftwareTlb};
