//! Flat per-region page tables.
//!
//! A region's page table is a single array with one frame number per page of the region, fixed
//! in length when the region is populated and never resized. There are no intermediate levels
//! and no absent entries: once a table exists every page in the region is backed.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::{
    AddressSpaceId, AllocError, FrameNumber, FramePool, Permissions, VirtualAddress,
    arch::PAGE_SIZE,
};

/// The frames backing one region, indexed by page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTable {
    frames: Box<[FrameNumber]>,
}

impl PageTable {
    /// Returns the frame backing page `index`.
    pub fn get(&self, index: usize) -> Option<FrameNumber> {
        self.frames.get(index).copied()
    }

    /// Returns the number of pages mapped.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Iterates over the backing frames in page order.
    pub fn frames(&self) -> impl Iterator<Item = FrameNumber> + '_ {
        self.frames.iter().copied()
    }
}

/// A contiguous, page-aligned range of user virtual addresses.
#[derive(Debug)]
pub struct Region {
    base: VirtualAddress,
    pages: usize,
    permissions: Permissions,
    table: Option<PageTable>,
}

impl Region {
    /// Creates a region of `pages` pages at `base`, with no page table yet.
    ///
    /// # Panics
    /// Panics if `base` is not page-aligned or the region would wrap the address space.
    pub fn new(base: VirtualAddress, pages: usize, permissions: Permissions) -> Self {
        assert!(base.is_page_aligned(), "region base {base} is not page-aligned");
        let end = pages
            .checked_mul(PAGE_SIZE)
            .and_then(|size| base.as_usize().checked_add(size));
        assert!(end.is_some(), "region at {base} of {pages} pages wraps the address space");
        Self {
            base,
            pages,
            permissions,
            table: None,
        }
    }

    pub fn base(&self) -> VirtualAddress {
        self.base
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Returns the region's size in bytes.
    pub fn size(&self) -> usize {
        self.pages * PAGE_SIZE
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    /// Returns the region's page table, if it has been populated.
    pub fn table(&self) -> Option<&PageTable> {
        self.table.as_ref()
    }

    pub fn has_table(&self) -> bool {
        self.table.is_some()
    }

    /// Returns the index of the page containing `vaddr`, if the region covers it.
    pub fn page_index(&self, vaddr: VirtualAddress) -> Option<usize> {
        let offset = vaddr.as_usize().checked_sub(self.base.as_usize())?;
        (offset < self.size()).then_some(offset / PAGE_SIZE)
    }

    /// Returns the frame backing `vaddr`.
    ///
    /// `None` if the region does not cover `vaddr`.
    ///
    /// # Panics
    /// Panics if the region covers `vaddr` but has no page table.
    pub fn frame_at(&self, vaddr: VirtualAddress) -> Option<FrameNumber> {
        let index = self.page_index(vaddr)?;
        let table = self
            .table
            .as_ref()
            .unwrap_or_else(|| panic!("{vaddr} lies in a region with no page table"));
        table.get(index)
    }

    /// Backs every page of the region with a freshly zeroed frame owned by `owner`.
    ///
    /// Frames are allocated one at a time. On failure, frames already allocated for this
    /// region are not returned here; they carry `owner`'s tag and are reclaimed when the
    /// address space is destroyed.
    pub(crate) fn populate(
        &mut self,
        pool: &FramePool,
        owner: AddressSpaceId,
    ) -> Result<(), AllocError> {
        assert!(self.table.is_none(), "region at {} already has a page table", self.base);

        let mut frames = Vec::with_capacity(self.pages);
        for _ in 0..self.pages {
            let frame = pool.allocate(1, Some(owner))?.frame_number();
            pool.zero_frame(frame);
            frames.push(frame);
        }

        self.table = Some(PageTable {
            frames: frames.into_boxed_slice(),
        });
        Ok(())
    }

    /// Creates a region with the same geometry and no page table.
    pub(crate) fn same_shape(&self) -> Self {
        Self::new(self.base, self.pages, self.permissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_pool::tests::pool_with_frames;

    fn region(base: usize, pages: usize) -> Region {
        Region::new(VirtualAddress::new(base), pages, Permissions::READ)
    }

    #[test]
    fn page_index_bounds() {
        let region = region(0x0040_0000, 3);
        assert_eq!(region.page_index(VirtualAddress::new(0x003f_ffff)), None);
        assert_eq!(region.page_index(VirtualAddress::new(0x0040_0000)), Some(0));
        assert_eq!(region.page_index(VirtualAddress::new(0x0040_2fff)), Some(2));
        assert_eq!(region.page_index(VirtualAddress::new(0x0040_3000)), None);
    }

    #[test]
    fn populate_backs_every_page_with_distinct_zeroed_frames() {
        let pool = pool_with_frames(8);
        let owner = AddressSpaceId::next();
        let mut region = region(0x1000, 3);

        region.populate(&pool, owner).unwrap();

        let table = region.table().unwrap();
        assert_eq!(table.len(), 3);
        let frames: Vec<_> = table.frames().collect();
        assert_ne!(frames[0], frames[1]);
        assert_ne!(frames[1], frames[2]);
        assert_eq!(pool.owned_frames(owner), 3);

        let mut buf = [0xffu8; 16];
        pool.read_frame(frames[2], 0, &mut buf);
        assert_eq!(buf, [0; 16]);
    }

    #[test]
    fn populate_failure_leaves_no_table() {
        let pool = pool_with_frames(2);
        let owner = AddressSpaceId::next();
        let mut region = region(0x1000, 3);

        assert_eq!(region.populate(&pool, owner), Err(AllocError::OutOfMemory));
        assert!(!region.has_table());
        // partial frames are still tagged for bulk release
        assert_eq!(pool.release_owner(owner), 2);
    }

    #[test]
    fn frame_at_outside_region_is_none() {
        let region = region(0x1000, 1);
        assert_eq!(region.frame_at(VirtualAddress::new(0x5000)), None);
    }

    #[test]
    #[should_panic(expected = "no page table")]
    fn frame_at_without_table_panics() {
        let region = region(0x1000, 1);
        region.frame_at(VirtualAddress::new(0x1000));
    }

    #[test]
    #[should_panic(expected = "wraps the address space")]
    fn wrapping_region_panics() {
        region(0x1000, usize::MAX / PAGE_SIZE);
    }

    #[test]
    #[should_panic(expected = "not page-aligned")]
    fn misaligned_base_panics() {
        region(0x1004, 1);
    }
}
