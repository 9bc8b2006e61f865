//! The VM subsystem object: kernel page allocation, TLB refill and context-switch hooks.
//!
//! There is exactly one [`Vm`], built at boot once the frame pool exists. It owns the pool,
//! the TLB and the interrupt mask used around TLB writes, and is shared by reference with the
//! trap and scheduler layers.

use crate::{
    AddressSpace, AllocError, FaultError, FaultKind, FramePool, InterruptControl,
    InterruptGuard, RegionKind, TextProtection, Tlb, TlbEntry, TlbFlags, VirtualAddress,
    VmConfig,
};

/// What the VM subsystem needs to know about the running process.
pub trait Process {
    /// Returns the process's address space, if it has one.
    ///
    /// Kernel-only threads have none.
    fn address_space(&self) -> Option<&AddressSpace>;
}

/// A request from another core to invalidate TLB entries.
///
/// Only single-core machines are supported, so no request can ever be honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbShootdown {
    pub address: VirtualAddress,
}

pub struct Vm<T: Tlb, I: InterruptControl> {
    pool: FramePool,
    tlb: spin::Mutex<T>,
    interrupts: I,
    config: VmConfig,
}

impl<T: Tlb, I: InterruptControl> Vm<T, I> {
    pub fn new(pool: FramePool, tlb: T, interrupts: I, config: VmConfig) -> Self {
        log::info!(
            "vm: {} TLB slots, text protection {:?}",
            tlb.slots(),
            config.text_protection
        );
        Self {
            pool,
            tlb: spin::Mutex::new(tlb),
            interrupts,
            config,
        }
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn interrupts(&self) -> &I {
        &self.interrupts
    }

    /// Runs `f` on the TLB with interrupts masked and the TLB lock held.
    pub fn with_tlb<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let _irq = InterruptGuard::new(&self.interrupts);
        let mut tlb = self.tlb.lock();
        f(&mut tlb)
    }

    /// Allocates `count` contiguous frames for the kernel.
    ///
    /// Returns the kernel virtual address of the first frame. The frames have no owner and
    /// must be released with [`free_kpages`](Self::free_kpages).
    pub fn alloc_kpages(&self, count: usize) -> Result<VirtualAddress, AllocError> {
        let phys = self.pool.allocate(count, None)?;
        let virt = self.pool.memory().phys_to_kvaddr(phys);
        log::debug!("kpages: {count} at {virt} ({phys})");
        Ok(virt)
    }

    /// Frees kernel pages returned by [`alloc_kpages`](Self::alloc_kpages).
    ///
    /// # Panics
    /// Panics if `vaddr` is not the start of a live kernel allocation.
    pub fn free_kpages(&self, vaddr: VirtualAddress) {
        let phys = self.pool.memory().kvaddr_to_phys(vaddr);
        log::debug!("kpages: freeing {vaddr} ({phys})");
        self.pool.free(phys);
    }

    /// Resolves a TLB miss for `current` by loading the translation for `address`.
    ///
    /// Only pages already backed by the current address space are ever installed; there is no
    /// demand paging. An error means the faulting process must be terminated.
    ///
    /// # Panics
    /// Panics if there is no current process or it has no address space, if the address lies
    /// in a region with no page table, or on a read-only fault while text is writable.
    pub fn handle_fault<P: Process + ?Sized>(
        &self,
        current: Option<&P>,
        kind: FaultKind,
        address: VirtualAddress,
    ) -> Result<(), FaultError> {
        #[cfg(feature = "detailed-logging")]
        log::trace!("fault: {kind:?} at {address}");

        if kind == FaultKind::ReadOnly {
            match self.config.text_protection {
                TextProtection::Writable => {
                    panic!("read-only fault at {address} with writable text")
                }
                TextProtection::ReadOnlyAfterLoad => return Err(FaultError::ReadOnly),
            }
        }

        let Some(process) = current else {
            panic!("TLB fault at {address} with no current process");
        };
        let Some(space) = process.address_space() else {
            panic!("TLB fault at {address} in a process with no address space");
        };

        let (region, _) = space.lookup(address).ok_or(FaultError::Unmapped)?;
        let frame = space
            .region(region)
            .and_then(|r| r.frame_at(address))
            .ok_or(FaultError::Unmapped)?;

        let writable = match self.config.text_protection {
            TextProtection::Writable => true,
            TextProtection::ReadOnlyAfterLoad => {
                region != RegionKind::Region1 || space.is_loading()
            }
        };
        let flags = if writable {
            TlbFlags::valid_dirty()
        } else {
            TlbFlags::valid()
        };

        self.install(TlbEntry::new(address.page_number(), frame, flags));
        Ok(())
    }

    /// Writes `entry` into the TLB.
    ///
    /// A slot already holding the same page is reused, then the first invalid slot; when the
    /// TLB is full a slot is chosen at random.
    fn install(&self, entry: TlbEntry) {
        let _irq = InterruptGuard::new(&self.interrupts);
        let mut tlb = self.tlb.lock();

        let slot = match tlb.probe(entry.page()).or_else(|| tlb.first_invalid()) {
            Some(slot) => {
                tlb.write(slot, entry);
                slot
            }
            None => tlb.write_random(entry),
        };

        #[cfg(feature = "detailed-logging")]
        log::trace!("tlb[{slot}] <- {entry:?}");
        #[cfg(not(feature = "detailed-logging"))]
        let _ = slot;
    }

    /// Finishes loading `space` and flushes the TLB.
    ///
    /// Region1 entries refilled while loading may still be writable; flushing makes the next
    /// access refill them under the post-load policy.
    pub fn complete_load(&self, space: &mut AddressSpace) {
        space.complete_load();
        self.with_tlb(|tlb| tlb.invalidate_all());
    }

    /// Makes `space` the active address space after a context switch.
    ///
    /// Every TLB entry belongs to the previous space, so all of them are invalidated. Threads
    /// with no address space leave the TLB alone.
    pub fn activate(&self, space: Option<&AddressSpace>) {
        if space.is_none() {
            return;
        }
        self.with_tlb(|tlb| tlb.invalidate_all());
    }

    /// Handles a shootdown request from another core.
    ///
    /// # Panics
    /// Always: only one core is supported.
    pub fn tlb_shootdown(&self, request: &TlbShootdown) -> ! {
        panic!("TLB shootdown of {} requested on a single-core system", request.address);
    }

    /// Handles a request to flush every TLB entry on behalf of another core.
    ///
    /// # Panics
    /// Always: only one core is supported.
    pub fn tlb_shootdown_all(&self) -> ! {
        panic!("TLB shootdown of all entries requested on a single-core system");
    }

    /// Returns the valid TLB entry translating `vaddr`, as the MMU would see it.
    pub fn translate(&self, vaddr: VirtualAddress) -> Option<TlbEntry> {
        self.with_tlb(|tlb| {
            tlb.probe(vaddr.page_number())
                .map(|slot| tlb.read(slot))
                .filter(TlbEntry::is_valid)
        })
    }
}
