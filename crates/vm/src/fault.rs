//! TLB fault classification.

use core::fmt;

/// The kind of TLB fault raised by the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// A load found no matching entry.
    Read,
    /// A store found no matching entry.
    Write,
    /// A store hit an entry without the dirty bit.
    ReadOnly,
}

impl TryFrom<u32> for FaultKind {
    type Error = FaultError;

    /// Decodes the trap layer's fault code.
    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Read),
            1 => Ok(Self::Write),
            2 => Ok(Self::ReadOnly),
            _ => Err(FaultError::InvalidKind),
        }
    }
}

/// A fault the VM subsystem could not resolve.
///
/// The trap layer turns these into a fatal signal for the faulting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// The address is not inside any region of the current address space.
    Unmapped,
    /// A write hit a page that is mapped read-only.
    ReadOnly,
    /// The trap layer passed an unknown fault code.
    InvalidKind,
}

impl fmt::Display for FaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unmapped => f.write_str("address not mapped"),
            Self::ReadOnly => f.write_str("write to read-only page"),
            Self::InvalidKind => f.write_str("unknown fault code"),
        }
    }
}
