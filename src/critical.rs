//! Process-wide critical section over the global interrupt mask.
//!
//! This is the kernel's sole mutual-exclusion primitive. The protocol is
//! deliberately asymmetric so that nested sections compose without a
//! counter: `disable` returns the enabled state it observed, and `enable`
//! only ever re-enables when handed `true`. A caller whose `disable` found
//! interrupts already masked got `false` back, and its matching `enable`
//! therefore does nothing — only the outermost caller, the one that
//! actually performed the transition, restores delivery.
//!
//! ```text
//! let a = cs.disable();   // true: we masked
//! let b = cs.disable();   // false: already masked
//! cs.enable(b);           // no-op
//! cs.enable(a);           // re-enables, exactly once
//! ```
//!
//! Suspending the current thread while a section is held is a kernel
//! defect, not a recoverable error.

use crate::hal::InterruptController;

/// Handle on the global interrupt toggle of an interrupt controller.
pub struct CriticalSection<'i, I: InterruptController> {
    intc: &'i I,
}

impl<'i, I: InterruptController> CriticalSection<'i, I> {
    pub fn new(intc: &'i I) -> Self {
        Self { intc }
    }

    /// Mask all maskable interrupts.
    ///
    /// Returns the enabled state that existed immediately before the call;
    /// that value must be passed to the matching [`enable`](Self::enable).
    #[must_use = "the returned status must be passed back to enable()"]
    pub fn disable(&self) -> bool {
        self.intc.global_disable()
    }

    /// Restore interrupt delivery if `status` is `true`.
    ///
    /// `enable(false)` is a no-op by contract — it must never disable.
    pub fn enable(&self, status: bool) {
        self.intc.global_enable(status);
    }

    /// Restore per [`enable`](Self::enable), then yield `value`.
    ///
    /// Fuses releasing the section with producing a result, so call sites
    /// can return straight out of a guarded region:
    ///
    /// ```ignore
    /// let status = cs.disable();
    /// let time = clock.time();
    /// cs.enable_with(status, time)
    /// ```
    pub fn enable_with<T>(&self, status: bool, value: T) -> T {
        self.enable(status);
        value
    }
}
