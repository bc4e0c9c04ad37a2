//! # Critical Sections
//!
//! Interrupt-safe execution for read-compare-update sequences on state that
//! another task may change between instructions.

use crate::platform::{InterruptControl, IrqState};

/// Execute a closure with interrupts and preemption disabled
///
/// The closure receives the collaborator back so it can read the guarded
/// state. Interrupts are restored to their previous state afterwards, so
/// nested calls are safe.
#[inline]
pub fn with_critical_section<P, F, R>(platform: &mut P, f: F) -> R
where
    P: InterruptControl + ?Sized,
    F: FnOnce(&mut P) -> R,
{
    let state = platform.disable();
    #[cfg(feature = "debug")]
    log::trace!("critical section enter (was {:?})", state);
    let result = f(platform);
    platform.restore(state);
    result
}

/// Critical section guard - interrupts stay disabled for its lifetime
pub struct CriticalSection<'a, P: InterruptControl + ?Sized> {
    platform: &'a mut P,
    state: IrqState,
}

impl<'a, P: InterruptControl + ?Sized> CriticalSection<'a, P> {
    /// Enter a critical section
    pub fn enter(platform: &'a mut P) -> Self {
        let state = platform.disable();
        Self { platform, state }
    }

    /// Access the collaborator while the section is held
    pub fn platform(&mut self) -> &mut P {
        self.platform
    }
}

impl<P: InterruptControl + ?Sized> Drop for CriticalSection<'_, P> {
    fn drop(&mut self) {
        self.platform.restore(self.state);
    }
}

impl<P: InterruptControl + ?Sized> core::fmt::Debug for CriticalSection<'_, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CriticalSection")
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Irq {
        enabled: bool,
        depth_seen: u32,
    }

    impl InterruptControl for Irq {
        fn disable(&mut self) -> IrqState {
            let was = self.enabled;
            self.enabled = false;
            IrqState(was)
        }

        fn restore(&mut self, state: IrqState) {
            self.enabled = state.0;
        }
    }

    #[test]
    fn test_closure_restores_state() {
        let mut irq = Irq {
            enabled: true,
            depth_seen: 0,
        };
        let value = with_critical_section(&mut irq, |p| {
            assert!(!p.enabled);
            p.depth_seen += 1;
            42
        });
        assert_eq!(value, 42);
        assert!(irq.enabled);
        assert_eq!(irq.depth_seen, 1);
    }

    #[test]
    fn test_nested_sections() {
        let mut irq = Irq {
            enabled: true,
            depth_seen: 0,
        };
        with_critical_section(&mut irq, |outer| {
            with_critical_section(outer, |inner| {
                assert!(!inner.enabled);
            });
            // Inner restore must not re-enable
            assert!(!outer.enabled);
        });
        assert!(irq.enabled);
    }

    #[test]
    fn test_guard_restores_on_drop() {
        let mut irq = Irq {
            enabled: true,
            depth_seen: 0,
        };
        {
            let mut cs = CriticalSection::enter(&mut irq);
            assert!(!cs.platform().enabled);
        }
        assert!(irq.enabled);
    }
}
