//! Per-process address spaces.
//!
//! A user address space has at most two general regions (typically code and data, defined
//! while loading an executable) and a fixed-size stack just below the kernel segment. Every
//! page of every region is backed by a frame from the moment [`AddressSpace::prepare_load`]
//! succeeds until the space is destroyed; nothing is paged in lazily.

use core::fmt;
use core::num::NonZeroU64;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::{
    AllocError, FrameNumber, FramePool, Region, VirtualAddress,
    arch::{KSEG0_BASE, PAGE_SIZE, STACK_PAGES, USER_STACK},
};

/// Errors returned by address space operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// The frame pool could not supply a frame.
    OutOfMemory,
    /// Both general regions are already defined.
    TooManyRegions,
    /// The requested region does not fit below the kernel segment.
    BadRegion,
}

impl From<AllocError> for VmError {
    fn from(_: AllocError) -> Self {
        Self::OutOfMemory
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("out of memory"),
            Self::TooManyRegions => f.write_str("address space already has two regions"),
            Self::BadRegion => f.write_str("region extends past user space"),
        }
    }
}

/// Identifies an address space for frame ownership.
///
/// Ids are never reused, so a stale id can never match a later address space's frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddressSpaceId(NonZeroU64);

impl AddressSpaceId {
    /// Hands out the next unused id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let id = NEXT.fetch_add(1, Ordering::Relaxed);
        match NonZeroU64::new(id) {
            Some(id) => Self(id),
            None => panic!("address space ids exhausted"),
        }
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "as#{}", self.0)
    }
}

bitflags::bitflags! {
    /// Access requested for a region.
    ///
    /// Recorded for diagnostics. Translation only distinguishes mapped from unmapped, apart
    /// from the optional read-only text policy.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

/// Which region of an address space an address falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// The first defined region, normally the executable's text.
    Region1,
    /// The second defined region, normally the executable's data.
    Region2,
    Stack,
}

/// A user process's virtual address space.
#[derive(Debug)]
pub struct AddressSpace {
    id: AddressSpaceId,
    region1: Option<Region>,
    region2: Option<Region>,
    stack: Region,
    loading: bool,
}

impl AddressSpace {
    /// Creates an empty address space with no regions and a fresh id.
    pub fn new() -> Self {
        Self {
            id: AddressSpaceId::next(),
            region1: None,
            region2: None,
            stack: Region::new(
                VirtualAddress::new(USER_STACK - STACK_PAGES * PAGE_SIZE),
                STACK_PAGES,
                Permissions::READ | Permissions::WRITE,
            ),
            loading: false,
        }
    }

    pub fn id(&self) -> AddressSpaceId {
        self.id
    }

    /// Returns whether the executable is still being loaded into this space.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Returns the region of the given kind, if defined.
    pub fn region(&self, kind: RegionKind) -> Option<&Region> {
        match kind {
            RegionKind::Region1 => self.region1.as_ref(),
            RegionKind::Region2 => self.region2.as_ref(),
            RegionKind::Stack => Some(&self.stack),
        }
    }

    /// Defines a region covering `size` bytes starting at `vaddr`.
    ///
    /// The range is widened to whole pages. The first call defines region1, the second
    /// region2; a third fails without changing anything. A range reaching past `KSEG0_BASE`
    /// is rejected with [`VmError::BadRegion`].
    pub fn define_region(
        &mut self,
        vaddr: VirtualAddress,
        size: usize,
        permissions: Permissions,
    ) -> Result<(), VmError> {
        let end = vaddr.as_usize().checked_add(size);
        if !matches!(end, Some(end) if end <= KSEG0_BASE) {
            log::warn!("{}: rejecting region {}+{:#x}", self.id, vaddr, size);
            return Err(VmError::BadRegion);
        }

        let size = size + vaddr.page_offset();
        let base = vaddr.page_base();
        let pages = size.div_ceil(PAGE_SIZE);

        let slot = if self.region1.is_none() {
            &mut self.region1
        } else if self.region2.is_none() {
            &mut self.region2
        } else {
            log::warn!("{}: rejecting third region at {}", self.id, base);
            return Err(VmError::TooManyRegions);
        };

        *slot = Some(Region::new(base, pages, permissions));
        Ok(())
    }

    /// Backs every page of every region, stack included, with a zeroed frame.
    ///
    /// Regions are populated in order: region1, region2, stack. Fails on the first frame the
    /// pool cannot supply; frames allocated up to that point stay allocated until
    /// [`destroy`](Self::destroy).
    ///
    /// # Panics
    /// Panics if any region already has a page table.
    pub fn prepare_load(&mut self, pool: &FramePool) -> Result<(), VmError> {
        assert!(
            !self.regions().any(|(_, region)| region.has_table()),
            "{}: prepare_load called on an address space that already has page tables",
            self.id
        );

        let id = self.id;
        for region in [self.region1.as_mut(), self.region2.as_mut(), Some(&mut self.stack)]
            .into_iter()
            .flatten()
        {
            region.populate(pool, id)?;
        }

        self.loading = true;
        log::debug!(
            "{}: prepared {} frames",
            self.id,
            self.regions().map(|(_, region)| region.pages()).sum::<usize>()
        );
        Ok(())
    }

    /// Marks loading as finished.
    ///
    /// Only affects translations installed from now on. Under read-only text, region1
    /// entries refilled while loading stay writable until the TLB is flushed; use
    /// [`Vm::complete_load`](crate::Vm::complete_load) to do both.
    pub fn complete_load(&mut self) {
        self.loading = false;
    }

    /// Returns the initial user stack pointer.
    ///
    /// # Panics
    /// Panics if the stack has no page table yet.
    pub fn define_stack(&self) -> VirtualAddress {
        assert!(
            self.stack.has_table(),
            "{}: stack defined before prepare_load",
            self.id
        );
        VirtualAddress::new(USER_STACK)
    }

    /// Creates an independent copy of this address space.
    ///
    /// The copy has the same regions and a fresh frame for every page, holding the same bytes.
    /// If the pool runs out partway, the partial copy is destroyed before returning.
    ///
    /// # Panics
    /// Panics if this address space has not been prepared.
    pub fn copy(&self, pool: &FramePool) -> Result<Self, VmError> {
        assert!(
            self.regions().all(|(_, region)| region.has_table()),
            "{}: copying an address space that has no page tables",
            self.id
        );

        let mut copy = Self {
            id: AddressSpaceId::next(),
            region1: self.region1.as_ref().map(Region::same_shape),
            region2: self.region2.as_ref().map(Region::same_shape),
            stack: self.stack.same_shape(),
            loading: false,
        };

        if let Err(err) = copy.prepare_load(pool) {
            let released = copy.destroy(pool);
            log::debug!(
                "{}: copy failed, released {} frames of partial copy",
                self.id,
                released
            );
            return Err(err);
        }

        for (kind, region) in self.regions() {
            let (Some(from), Some(to)) = (
                region.table(),
                copy.region(kind).and_then(Region::table),
            ) else {
                continue;
            };
            for (src, dst) in from.frames().zip(to.frames()) {
                pool.copy_frame(dst, src);
            }
        }

        copy.loading = self.loading;
        log::debug!("{}: copied into {}", self.id, copy.id);
        Ok(copy)
    }

    /// Tears down the address space, returning every frame it owns to the pool.
    ///
    /// Returns the number of frames released.
    pub fn destroy(self, pool: &FramePool) -> usize {
        let released = pool.release_owner(self.id);
        log::debug!("{}: destroyed, released {} frames", self.id, released);
        released
    }

    /// Finds the region covering `vaddr` and the page's index within it.
    ///
    /// Regions are searched in order: region1, region2, stack.
    pub fn lookup(&self, vaddr: VirtualAddress) -> Option<(RegionKind, usize)> {
        self.regions()
            .find_map(|(kind, region)| region.page_index(vaddr).map(|index| (kind, index)))
    }

    /// Returns the frame backing `vaddr`, or `None` if no region covers it.
    ///
    /// # Panics
    /// Panics if a region covers `vaddr` but has no page table.
    pub fn frame_at(&self, vaddr: VirtualAddress) -> Option<FrameNumber> {
        let (kind, _) = self.lookup(vaddr)?;
        self.region(kind)?.frame_at(vaddr)
    }

    /// Iterates over the defined regions in lookup order.
    pub fn regions(&self) -> impl Iterator<Item = (RegionKind, &Region)> + '_ {
        [
            (RegionKind::Region1, self.region1.as_ref()),
            (RegionKind::Region2, self.region2.as_ref()),
            (RegionKind::Stack, Some(&self.stack)),
        ]
        .into_iter()
        .filter_map(|(kind, region)| region.map(|region| (kind, region)))
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_pool::tests::pool_with_frames;

    fn loaded_space(pool: &FramePool) -> AddressSpace {
        let mut space = AddressSpace::new();
        space
            .define_region(VirtualAddress::new(0x0040_0000), 0x1800, Permissions::READ)
            .unwrap();
        space
            .define_region(
                VirtualAddress::new(0x1000_0000),
                0x1000,
                Permissions::READ | Permissions::WRITE,
            )
            .unwrap();
        space.prepare_load(pool).unwrap();
        space
    }

    #[test]
    fn ids_are_unique() {
        let a = AddressSpace::new();
        let b = AddressSpace::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn define_region_widens_to_pages() {
        let mut space = AddressSpace::new();
        space
            .define_region(VirtualAddress::new(0x0040_0100), 0x1000, Permissions::READ)
            .unwrap();

        let region = space.region(RegionKind::Region1).unwrap();
        assert_eq!(region.base(), VirtualAddress::new(0x0040_0000));
        assert_eq!(region.pages(), 2);
    }

    #[test]
    fn third_region_is_rejected_without_change() {
        let mut space = AddressSpace::new();
        let a = VirtualAddress::new(0x0040_0000);
        let b = VirtualAddress::new(0x1000_0000);
        space.define_region(a, 0x1000, Permissions::READ).unwrap();
        space.define_region(b, 0x1000, Permissions::WRITE).unwrap();

        let result =
            space.define_region(VirtualAddress::new(0x2000_0000), 0x1000, Permissions::READ);

        assert_eq!(result, Err(VmError::TooManyRegions));
        assert_eq!(space.region(RegionKind::Region1).unwrap().base(), a);
        assert_eq!(space.region(RegionKind::Region2).unwrap().base(), b);
    }

    #[test]
    fn oversized_region_is_rejected_without_change() {
        let mut space = AddressSpace::new();

        let huge = space.define_region(
            VirtualAddress::new(0x1234),
            usize::MAX - 0x100,
            Permissions::READ,
        );
        assert_eq!(huge, Err(VmError::BadRegion));
        assert_eq!(
            space.define_region(VirtualAddress::new(0x7fff_f000), 0x2000, Permissions::READ),
            Err(VmError::BadRegion)
        );
        assert!(space.region(RegionKind::Region1).is_none());

        // a region may end exactly at the kernel segment
        space
            .define_region(VirtualAddress::new(0x7fff_e000), 0x2000, Permissions::READ)
            .unwrap();
        assert_eq!(space.region(RegionKind::Region1).unwrap().pages(), 2);
    }

    #[test]
    fn prepare_load_allocates_one_frame_per_page() {
        let pool = pool_with_frames(32);
        let space = loaded_space(&pool);

        assert!(space.is_loading());
        assert_eq!(pool.owned_frames(space.id()), 2 + 1 + STACK_PAGES);
        assert_eq!(space.define_stack(), VirtualAddress::new(USER_STACK));
    }

    #[test]
    fn prepare_load_out_of_memory_then_destroy_reclaims() {
        let pool = pool_with_frames(8);
        let mut space = AddressSpace::new();
        space
            .define_region(VirtualAddress::new(0x0040_0000), 0x3000, Permissions::READ)
            .unwrap();

        // 3 region pages fit, the 12-page stack does not
        assert_eq!(space.prepare_load(&pool), Err(VmError::OutOfMemory));
        assert_eq!(pool.used_frames(), 8);

        assert_eq!(space.destroy(&pool), 8);
        assert_eq!(pool.used_frames(), 0);
    }

    #[test]
    #[should_panic(expected = "already has page tables")]
    fn prepare_load_twice_panics() {
        let pool = pool_with_frames(32);
        let mut space = loaded_space(&pool);
        let _ = space.prepare_load(&pool);
    }

    #[test]
    #[should_panic(expected = "stack defined before prepare_load")]
    fn define_stack_before_prepare_panics() {
        AddressSpace::new().define_stack();
    }

    #[test]
    fn lookup_priority_and_stack_bounds() {
        let pool = pool_with_frames(32);
        let space = loaded_space(&pool);

        assert_eq!(
            space.lookup(VirtualAddress::new(0x0040_1fff)),
            Some((RegionKind::Region1, 1))
        );
        assert_eq!(
            space.lookup(VirtualAddress::new(0x1000_0004)),
            Some((RegionKind::Region2, 0))
        );
        assert_eq!(
            space.lookup(VirtualAddress::new(USER_STACK - 1)),
            Some((RegionKind::Stack, STACK_PAGES - 1))
        );
        assert_eq!(
            space.lookup(VirtualAddress::new(USER_STACK - STACK_PAGES * PAGE_SIZE)),
            Some((RegionKind::Stack, 0))
        );
        assert_eq!(
            space.lookup(VirtualAddress::new(USER_STACK - STACK_PAGES * PAGE_SIZE - 1)),
            None
        );
        assert_eq!(space.lookup(VirtualAddress::new(0x0040_2000)), None);
    }

    #[test]
    #[should_panic(expected = "no page table")]
    fn frame_at_before_prepare_panics() {
        let mut space = AddressSpace::new();
        space
            .define_region(VirtualAddress::new(0x0040_0000), 0x1000, Permissions::READ)
            .unwrap();
        space.frame_at(VirtualAddress::new(0x0040_0000));
    }

    #[test]
    fn copy_duplicates_contents_not_frames() {
        let pool = pool_with_frames(64);
        let source = loaded_space(&pool);
        let text = source.frame_at(VirtualAddress::new(0x0040_1000)).unwrap();
        pool.write_frame(text, 0x10, b"hello");

        let copy = source.copy(&pool).unwrap();
        let copied = copy.frame_at(VirtualAddress::new(0x0040_1000)).unwrap();
        assert_ne!(copied, text);

        let mut buf = [0u8; 5];
        pool.read_frame(copied, 0x10, &mut buf);
        assert_eq!(&buf, b"hello");

        pool.write_frame(copied, 0x10, b"world");
        pool.read_frame(text, 0x10, &mut buf);
        assert_eq!(&buf, b"hello");

        assert!(copy.is_loading());
        assert_eq!(pool.owned_frames(copy.id()), pool.owned_frames(source.id()));
    }

    #[test]
    fn copy_out_of_memory_leaves_nothing_behind() {
        let pool = pool_with_frames(20);
        let source = loaded_space(&pool);
        let used = pool.used_frames();

        assert_eq!(source.copy(&pool).err(), Some(VmError::OutOfMemory));
        assert_eq!(pool.used_frames(), used);
    }

    #[test]
    #[should_panic(expected = "has no page tables")]
    fn copy_before_prepare_panics() {
        let pool = pool_with_frames(4);
        let _ = AddressSpace::new().copy(&pool);
    }

    #[test]
    fn destroy_leaves_other_spaces_intact() {
        let pool = pool_with_frames(64);
        let a = loaded_space(&pool);
        let b = loaded_space(&pool);
        let b_frames = pool.owned_frames(b.id());

        assert_eq!(a.destroy(&pool), b_frames);
        assert_eq!(pool.owned_frames(b.id()), b_frames);
        assert_eq!(pool.used_frames(), b_frames);
    }
}
