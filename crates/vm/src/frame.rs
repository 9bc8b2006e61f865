use crate::AddressSpaceId;

/// Bookkeeping for one physical frame in the frame pool.
///
/// A run of frames handed out by a single allocation is marked used on every frame and
/// tagged with the owning address space on every frame, but only the first frame records the
/// run length. Every other frame, used or free, has a run length of zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    owner: Option<AddressSpaceId>,
    used: bool,
    run_length: usize,
}

impl FrameDescriptor {
    /// Descriptor of a frame nobody holds.
    pub const FREE: Self = Self {
        owner: None,
        used: false,
        run_length: 0,
    };

    /// Returns the address space this frame was allocated for, if any.
    ///
    /// Kernel allocations have no owner.
    pub const fn owner(&self) -> Option<AddressSpaceId> {
        self.owner
    }

    /// Returns whether the frame is allocated.
    pub const fn is_used(&self) -> bool {
        self.used
    }

    /// Returns the number of frames in the run this frame starts, or zero.
    pub const fn run_length(&self) -> usize {
        self.run_length
    }

    /// Returns whether this frame is the first frame of an allocated run.
    pub const fn is_run_head(&self) -> bool {
        self.used && self.run_length > 0
    }

    pub(crate) fn claim(&mut self, owner: Option<AddressSpaceId>, run_length: usize) {
        debug_assert!(!self.used, "claiming a frame that is already in use");
        *self = Self {
            owner,
            used: true,
            run_length,
        };
    }

    pub(crate) fn release(&mut self) {
        *self = Self::FREE;
    }
}

impl Default for FrameDescriptor {
    fn default() -> Self {
        Self::FREE
    }
}
