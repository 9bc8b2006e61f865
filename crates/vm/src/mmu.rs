//! Emulated MMU for host builds.
//!
//! Performs user accesses the way the hardware would: look the page up in the TLB, trap into
//! [`Vm::handle_fault`] on a miss, and raise a read-only fault on a store through an entry
//! without the dirty bit. Lets tests and host tools read and write user memory through the
//! real refill path.

use crate::{
    FaultError, FaultKind, InterruptControl, PhysicalAddress, Process, Tlb, VirtualAddress, Vm,
    arch::PAGE_SIZE,
};

/// The kind of user access being emulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Load,
    Store,
}

/// User-mode memory accesses on behalf of one process.
pub struct Mmu<'a, T: Tlb, I: InterruptControl, P: Process + ?Sized> {
    vm: &'a Vm<T, I>,
    process: &'a P,
}

impl<'a, T: Tlb, I: InterruptControl, P: Process + ?Sized> Mmu<'a, T, I, P> {
    pub fn new(vm: &'a Vm<T, I>, process: &'a P) -> Self {
        Self { vm, process }
    }

    /// Translates `vaddr` for `access`, refilling the TLB as needed.
    pub fn access(
        &self,
        access: Access,
        vaddr: VirtualAddress,
    ) -> Result<PhysicalAddress, FaultError> {
        let entry = match self.vm.translate(vaddr) {
            Some(entry) => entry,
            None => {
                let kind = match access {
                    Access::Load => FaultKind::Read,
                    Access::Store => FaultKind::Write,
                };
                self.vm.handle_fault(Some(self.process), kind, vaddr)?;
                match self.vm.translate(vaddr) {
                    Some(entry) => entry,
                    None => panic!("refill for {vaddr} installed no TLB entry"),
                }
            }
        };

        if access == Access::Store && !entry.is_writable() {
            self.vm
                .handle_fault(Some(self.process), FaultKind::ReadOnly, vaddr)?;
        }

        Ok(entry.frame().start() + vaddr.page_offset())
    }

    /// Reads `buf.len()` bytes of user memory starting at `vaddr`.
    pub fn read(&self, vaddr: VirtualAddress, buf: &mut [u8]) -> Result<(), FaultError> {
        let mut done = 0;
        while done < buf.len() {
            let at = vaddr + done;
            let len = (PAGE_SIZE - at.page_offset()).min(buf.len() - done);
            let phys = self.access(Access::Load, at)?;
            self.vm
                .pool()
                .read_frame(phys.frame_number(), phys.page_offset(), &mut buf[done..done + len]);
            done += len;
        }
        Ok(())
    }

    /// Writes `data` to user memory starting at `vaddr`.
    pub fn write(&self, vaddr: VirtualAddress, data: &[u8]) -> Result<(), FaultError> {
        let mut done = 0;
        while done < data.len() {
            let at = vaddr + done;
            let len = (PAGE_SIZE - at.page_offset()).min(data.len() - done);
            let phys = self.access(Access::Store, at)?;
            self.vm
                .pool()
                .write_frame(phys.frame_number(), phys.page_offset(), &data[done..done + len]);
            done += len;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AddressSpace, VmConfig,
        vm::tests::{DATA, TEXT, loading_process, test_vm},
    };

    #[test]
    fn fresh_pages_read_as_zero() {
        let vm = test_vm(32, VmConfig::default());
        let process = loading_process(&vm);
        let mmu = Mmu::new(&vm, &process);

        let mut buf = [0xffu8; 64];
        mmu.read(VirtualAddress::new(DATA + 100), &mut buf).unwrap();
        assert_eq!(buf, [0; 64]);
    }

    #[test]
    fn every_page_reads_as_zero_after_load() {
        let vm = test_vm(32, VmConfig::default());
        let mut process = loading_process(&vm);
        vm.complete_load(process.space.as_mut().unwrap());

        let space = process.address_space().unwrap();
        let regions: Vec<_> = space
            .regions()
            .map(|(_, region)| (region.base(), region.size()))
            .collect();
        assert_eq!(regions.len(), 3);

        let mmu = Mmu::new(&vm, &process);
        for (base, size) in regions {
            let mut contents = vec![0xffu8; size];
            mmu.read(base, &mut contents).unwrap();
            assert!(contents.iter().all(|&b| b == 0), "region at {base} not zeroed");
        }
    }

    #[test]
    fn write_spans_page_boundary() {
        let vm = test_vm(32, VmConfig::default());
        let process = loading_process(&vm);
        let mmu = Mmu::new(&vm, &process);
        let start = VirtualAddress::new(TEXT + PAGE_SIZE - 3);

        mmu.write(start, b"boundary").unwrap();

        let mut buf = [0u8; 8];
        mmu.read(start, &mut buf).unwrap();
        assert_eq!(&buf, b"boundary");
        assert_eq!(vm.with_tlb(|tlb| tlb.valid_entries()), 2);
    }

    #[test]
    fn unmapped_access_faults() {
        let vm = test_vm(32, VmConfig::default());
        let process = loading_process(&vm);
        let mmu = Mmu::new(&vm, &process);

        let mut buf = [0u8; 4];
        assert_eq!(
            mmu.read(VirtualAddress::new(0x0800_0000), &mut buf),
            Err(FaultError::Unmapped)
        );
    }

    #[test]
    fn store_to_loaded_text_faults_read_only() {
        let vm = test_vm(32, VmConfig::read_only_text());
        let mut process = loading_process(&vm);
        let text = VirtualAddress::new(TEXT);

        Mmu::new(&vm, &process).write(text, b"code").unwrap();

        process.space.as_mut().unwrap().complete_load();
        vm.activate(process.address_space());

        let mmu = Mmu::new(&vm, &process);
        let mut buf = [0u8; 4];
        mmu.read(text, &mut buf).unwrap();
        assert_eq!(&buf, b"code");
        assert_eq!(mmu.write(text, b"oops"), Err(FaultError::ReadOnly));
        assert_eq!(mmu.write(VirtualAddress::new(DATA), b"fine"), Ok(()));
    }

    #[test]
    fn copy_does_not_alias_through_mmu() {
        let vm = test_vm(64, VmConfig::default());
        let parent = loading_process(&vm);
        let stack_top = parent.address_space().unwrap().define_stack();
        let slot = stack_top - 16;

        Mmu::new(&vm, &parent).write(slot, b"parent").unwrap();
        let child_space = parent.address_space().unwrap().copy(vm.pool()).unwrap();
        let child = crate::vm::tests::TestProcess {
            space: Some(child_space),
        };

        vm.activate(child.address_space());
        Mmu::new(&vm, &child).write(slot, b"child!").unwrap();

        vm.activate(parent.address_space());
        let mut buf = [0u8; 6];
        Mmu::new(&vm, &parent).read(slot, &mut buf).unwrap();
        assert_eq!(&buf, b"parent");
    }

    #[test]
    fn destroy_one_space_keeps_the_other_readable() {
        let vm = test_vm(64, VmConfig::default());
        let a = loading_process(&vm);
        let b = loading_process(&vm);
        let data = VirtualAddress::new(DATA);

        Mmu::new(&vm, &b).write(data, b"still here").unwrap();

        let a_space: AddressSpace = a.space.unwrap();
        a_space.destroy(vm.pool());

        vm.activate(b.address_space());
        let mut buf = [0u8; 10];
        Mmu::new(&vm, &b).read(data, &mut buf).unwrap();
        assert_eq!(&buf, b"still here");
    }
}
