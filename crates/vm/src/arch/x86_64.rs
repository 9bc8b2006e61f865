//! x86_64 interrupt masking.

use x86_64::instructions::interrupts;

use crate::InterruptControl;

/// Masks interrupts on the local core with `cli`/`sti`.
///
/// Only usable in ring 0. Host test binaries must use
/// [`SoftwareInterrupts`](super::SoftwareInterrupts) instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct HardwareInterrupts;

impl InterruptControl for HardwareInterrupts {
    fn disable(&self) -> bool {
        let was_enabled = interrupts::are_enabled();
        interrupts::disable();
        was_enabled
    }

    fn restore(&self, was_enabled: bool) {
        if was_enabled {
            interrupts::enable();
        }
    }
}
