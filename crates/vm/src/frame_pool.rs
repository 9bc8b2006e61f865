//! Physical frame pool (the coremap).
//!
//! The pool tracks every physical frame left over after early boot with one
//! [`FrameDescriptor`] per frame. The descriptor array itself lives in frames stolen from the
//! boot allocator, directly below the frames it describes.
//!
//! Allocation is a first-fit linear scan for a run of consecutive free frames, starting at
//! frame 0 every time. Cost is linear in the pool size, and the single pool lock is held for
//! the whole scan. That is fine for a teaching-scale machine and would not be for anything
//! bigger.

use core::fmt;
use core::ptr::NonNull;

use crate::{
    AddressSpaceId, BootAllocator, FrameDescriptor, FrameNumber, PhysicalAddress, PhysicalMemory,
    arch::PAGE_SIZE,
};

/// Errors that can occur during physical frame allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// No run of free frames long enough is available.
    OutOfMemory,
    /// Nothing was left for the pool to manage after early boot.
    NoManageableMemory,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("out of physical frames"),
            Self::NoManageableMemory => f.write_str("no physical memory left to manage"),
        }
    }
}

/// The descriptor array and used-frame counter, guarded together by the pool lock.
struct Coremap {
    descriptors: NonNull<FrameDescriptor>,
    len: usize,
    used: usize,
}

// SAFETY: `descriptors` points into physical memory owned by the pool for its whole lifetime,
// and is only dereferenced while the pool lock is held.
unsafe impl Send for Coremap {}

impl Coremap {
    fn frames(&self) -> &[FrameDescriptor] {
        // SAFETY: bootstrap initialised `len` descriptors at `descriptors`.
        unsafe { core::slice::from_raw_parts(self.descriptors.as_ptr(), self.len) }
    }

    fn frames_mut(&mut self) -> &mut [FrameDescriptor] {
        // SAFETY: as above; `&mut self` means we hold the lock exclusively.
        unsafe { core::slice::from_raw_parts_mut(self.descriptors.as_ptr(), self.len) }
    }

    /// Finds the first run of `count` consecutive unused frames, scanning from frame 0.
    fn find_run(&self, count: usize) -> Option<usize> {
        let mut run_start = 0;
        let mut run_length = 0;

        for (index, frame) in self.frames().iter().enumerate() {
            if frame.is_used() {
                run_start = index + 1;
                run_length = 0;
                continue;
            }

            run_length += 1;
            if run_length == count {
                return Some(run_start);
            }
        }

        None
    }
}

/// The system-wide physical frame pool.
///
/// Constructed once at boot by [`FramePool::bootstrap`] and shared by reference with every
/// caller. All state changes happen under one spin lock.
pub struct FramePool {
    coremap: spin::Mutex<Coremap>,
    first_frame: FrameNumber,
    memory: PhysicalMemory,
}

impl FramePool {
    /// Builds the pool from whatever RAM the boot allocator has not handed out.
    ///
    /// Just enough frames for the descriptor array are stolen first; every frame after them
    /// is managed by the pool and starts out free. Consuming the boot allocator means no more
    /// frames can be stolen once the pool exists.
    pub fn bootstrap(mut boot: BootAllocator, memory: PhysicalMemory) -> Result<Self, AllocError> {
        let remaining = boot.remaining_frames();
        let descriptor_size = core::mem::size_of::<FrameDescriptor>();

        // Reserve r frames so that r * PAGE_SIZE >= (remaining - r) * descriptor_size.
        let reserved = (remaining * descriptor_size).div_ceil(PAGE_SIZE + descriptor_size);
        let managed = remaining - reserved;
        if managed == 0 {
            log::error!("frame pool bootstrap: {remaining} frames left, none manageable");
            return Err(AllocError::NoManageableMemory);
        }

        let storage = boot
            .steal_frames(reserved)
            .ok_or(AllocError::NoManageableMemory)?;
        let ram = boot.into_remaining();
        debug_assert_eq!(ram.size() / PAGE_SIZE, managed);

        let descriptors = NonNull::new(memory.typed::<FrameDescriptor>(storage, managed))
            .ok_or(AllocError::NoManageableMemory)?;
        for index in 0..managed {
            // SAFETY: the stolen frames hold at least `managed` descriptors and nothing else
            // references them.
            unsafe { descriptors.add(index).write(FrameDescriptor::FREE) };
        }

        log::info!(
            "frame pool: managing {} frames ({} KiB) from {}, {} frames of bookkeeping at {}",
            managed,
            managed * PAGE_SIZE / 1024,
            ram.low(),
            reserved,
            storage
        );

        Ok(Self {
            coremap: spin::Mutex::new(Coremap {
                descriptors,
                len: managed,
                used: 0,
            }),
            first_frame: ram.low().frame_number(),
            memory,
        })
    }

    /// Allocates `count` physically contiguous frames for `owner`.
    ///
    /// Returns the physical address of the first frame. Fails without touching any descriptor
    /// when the pool budget would be exceeded or no long enough run of free frames exists.
    ///
    /// # Panics
    /// Panics if `count` is zero.
    pub fn allocate(
        &self,
        count: usize,
        owner: Option<AddressSpaceId>,
    ) -> Result<PhysicalAddress, AllocError> {
        assert!(count > 0, "allocating an empty run of frames");

        let mut coremap = self.coremap.lock();

        if count > coremap.len - coremap.used {
            return Err(AllocError::OutOfMemory);
        }

        let start = coremap.find_run(count).ok_or(AllocError::OutOfMemory)?;

        let run = &mut coremap.frames_mut()[start..start + count];
        let (head, tail) = run.split_at_mut(1);
        head[0].claim(owner, count);
        for frame in tail {
            frame.claim(owner, 0);
        }
        coremap.used += count;

        Ok(self.frame_address(start))
    }

    /// Frees the run of frames starting at `base`.
    ///
    /// # Panics
    /// Panics unless `base` is the first frame of a run handed out by [`allocate`](Self::allocate)
    /// and not yet freed.
    pub fn free(&self, base: PhysicalAddress) {
        assert!(
            base.is_page_aligned(),
            "freeing {base}, which is not page-aligned"
        );
        let index = self
            .index_of(base)
            .unwrap_or_else(|| panic!("freeing {base}, which the frame pool does not manage"));

        let mut coremap = self.coremap.lock();
        let head = coremap.frames()[index];
        assert!(
            head.is_run_head(),
            "freeing {base}, which does not start an allocated run"
        );

        let count = head.run_length();
        for frame in &mut coremap.frames_mut()[index..index + count] {
            frame.release();
        }
        coremap.used -= count;
    }

    /// Releases every frame tagged with `owner`, returning how many were released.
    ///
    /// One pass over the whole pool; runs are released in full because every frame of a run
    /// carries the owner tag.
    pub fn release_owner(&self, owner: AddressSpaceId) -> usize {
        let mut coremap = self.coremap.lock();

        let mut released = 0;
        for frame in coremap.frames_mut() {
            if frame.is_used() && frame.owner() == Some(owner) {
                frame.release();
                released += 1;
            }
        }
        coremap.used -= released;
        released
    }

    /// Returns the number of frames the pool manages.
    pub fn total_frames(&self) -> usize {
        self.coremap.lock().len
    }

    /// Returns the number of frames currently allocated.
    pub fn used_frames(&self) -> usize {
        self.coremap.lock().used
    }

    /// Returns the number of frames currently free.
    pub fn free_frames(&self) -> usize {
        let coremap = self.coremap.lock();
        coremap.len - coremap.used
    }

    /// Returns the number of frames tagged with `owner`.
    pub fn owned_frames(&self, owner: AddressSpaceId) -> usize {
        self.coremap
            .lock()
            .frames()
            .iter()
            .filter(|frame| frame.is_used() && frame.owner() == Some(owner))
            .count()
    }

    /// Returns a copy of the descriptor for the `index`th managed frame.
    pub fn descriptor(&self, index: usize) -> Option<FrameDescriptor> {
        self.coremap.lock().frames().get(index).copied()
    }

    /// Returns the physical address of the `index`th managed frame.
    pub fn frame_address(&self, index: usize) -> PhysicalAddress {
        (self.first_frame + index).start()
    }

    /// Returns the pool index of the frame at `address`, if the pool manages it.
    pub fn index_of(&self, address: PhysicalAddress) -> Option<usize> {
        let frame = address.frame_number();
        if frame < self.first_frame {
            return None;
        }
        let index = frame - self.first_frame;
        (index < self.total_frames()).then_some(index)
    }

    /// Returns the physical memory the pool hands out.
    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    /// Fills an allocated frame with zeroes.
    pub fn zero_frame(&self, frame: FrameNumber) {
        self.assert_allocated(frame);
        // SAFETY: the frame is allocated, so it is RAM owned by whoever asked.
        unsafe { self.memory.zero(frame.start(), PAGE_SIZE) };
    }

    /// Copies the contents of frame `src` into frame `dst`.
    pub fn copy_frame(&self, dst: FrameNumber, src: FrameNumber) {
        self.assert_allocated(dst);
        self.assert_allocated(src);
        // SAFETY: both frames are allocated RAM.
        unsafe { self.memory.copy(dst.start(), src.start(), PAGE_SIZE) };
    }

    /// Reads bytes from an allocated frame, starting `offset` bytes in.
    ///
    /// # Panics
    /// Panics if the read would cross the end of the frame.
    pub fn read_frame(&self, frame: FrameNumber, offset: usize, buf: &mut [u8]) {
        self.assert_allocated(frame);
        assert!(offset + buf.len() <= PAGE_SIZE, "read crosses frame boundary");
        // SAFETY: the frame is allocated RAM and the range stays inside it.
        unsafe { self.memory.read(frame.start() + offset, buf) };
    }

    /// Writes bytes into an allocated frame, starting `offset` bytes in.
    ///
    /// # Panics
    /// Panics if the write would cross the end of the frame.
    pub fn write_frame(&self, frame: FrameNumber, offset: usize, data: &[u8]) {
        self.assert_allocated(frame);
        assert!(offset + data.len() <= PAGE_SIZE, "write crosses frame boundary");
        // SAFETY: the frame is allocated RAM and the range stays inside it.
        unsafe { self.memory.write(frame.start() + offset, data) };
    }

    fn assert_allocated(&self, frame: FrameNumber) {
        let index = self.index_of(frame.start());
        let used = index
            .and_then(|index| self.descriptor(index))
            .is_some_and(|descriptor| descriptor.is_used());
        assert!(used, "frame {frame} is not an allocated pool frame");
    }
}
