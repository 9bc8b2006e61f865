/// Local interrupt masking.
///
/// `disable` masks interrupts on the current core and returns whether they were enabled
/// before, so nested sections restore correctly.
pub trait InterruptControl {
    fn disable(&self) -> bool;
    fn restore(&self, was_enabled: bool);
}

impl<T: InterruptControl + ?Sized> InterruptControl for &T {
    fn disable(&self) -> bool {
        (**self).disable()
    }

    fn restore(&self, was_enabled: bool) {
        (**self).restore(was_enabled)
    }
}

/// Keeps interrupts masked until dropped, then puts them back the way they were.
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct InterruptGuard<'a, I: InterruptControl + ?Sized> {
    control: &'a I,
    was_enabled: bool,
}

impl<'a, I: InterruptControl + ?Sized> InterruptGuard<'a, I> {
    pub fn new(control: &'a I) -> Self {
        let was_enabled = control.disable();
        Self {
            control,
            was_enabled,
        }
    }
}

impl<I: InterruptControl + ?Sized> Drop for InterruptGuard<'_, I> {
    fn drop(&mut self) {
        self.control.restore(self.was_enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::SoftwareInterrupts;

    #[test]
    fn guard_restores_on_drop() {
        let irq = SoftwareInterrupts::new();
        {
            let _guard = InterruptGuard::new(&irq);
            assert!(!irq.are_enabled());
        }
        assert!(irq.are_enabled());
    }

    #[test]
    fn nested_guards_restore_outermost_state() {
        let irq = SoftwareInterrupts::new();
        {
            let _outer = InterruptGuard::new(&irq);
            {
                let _inner = InterruptGuard::new(&irq);
            }
            assert!(!irq.are_enabled());
        }
        assert!(irq.are_enabled());
    }
}
