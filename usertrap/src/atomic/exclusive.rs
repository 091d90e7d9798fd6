//! Process-wide exclusive section for emulated atomics
//!
//! Every emulated read-modify-write of every guest thread runs inside this
//! one section, so two emulated atomics never interleave. Entering returns a
//! guard; the section is left when the guard drops, including on early
//! return from a faulting access.

use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

/// A spinlock with no payload, owned by the shared runtime
pub struct ExclusiveSection {
    held: AtomicBool,
}

impl Default for ExclusiveSection {
    fn default() -> Self {
        Self::new()
    }
}

impl ExclusiveSection {
    /// Create a new, free section
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    /// Enter the section, spinning until it is free
    pub fn enter(&self) -> ExclusiveGuard<'_> {
        while self
            .held
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
        ExclusiveGuard { section: self }
    }

    /// Try to enter without spinning
    ///
    /// Returns None if another thread is inside
    pub fn try_enter(&self) -> Option<ExclusiveGuard<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| ExclusiveGuard { section: self })
    }

    /// True while some thread is inside the section
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }

    fn leave(&self) {
        self.held.store(false, Ordering::Release);
    }
}

/// RAII guard for the exclusive section
///
/// When dropped, leaves the section
pub struct ExclusiveGuard<'a> {
    section: &'a ExclusiveSection,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.section.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_releases_on_drop() {
        let section = ExclusiveSection::new();
        {
            let _guard = section.enter();
            assert!(section.is_held());
            assert!(section.try_enter().is_none());
        }
        assert!(!section.is_held());
        assert!(section.try_enter().is_some());
    }
}
