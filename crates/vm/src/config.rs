//! Runtime policy for the VM subsystem.

/// How pages of the first region (the executable's text) are mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextProtection {
    /// Every page is mapped writable. A read-only fault can never happen and is treated as
    /// a kernel bug.
    #[default]
    Writable,
    /// Region1 pages are writable only while the executable is loading. Afterwards a write
    /// raises a read-only fault, which is reported so the offending process can be killed.
    ReadOnlyAfterLoad,
}

/// Configuration passed to [`Vm::new`](crate::Vm::new).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VmConfig {
    pub text_protection: TextProtection,
}

impl VmConfig {
    /// Configuration with read-only text after load.
    pub const fn read_only_text() -> Self {
        Self {
            text_protection: TextProtection::ReadOnlyAfterLoad,
        }
    }
}
