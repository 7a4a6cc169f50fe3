//! Hardware abstraction contracts consumed by the scheduling core.
//!
//! Per-family drivers (register maps, PLL and watchdog setup, vector table
//! plumbing) live outside this crate; the core only sees the narrow
//! capabilities below. Nothing in the kernel touches a raw hardware address
//! directly — a port supplies typed implementations of these traits.

use crate::errors::InterruptError;

pub mod mock;

pub use mock::{MockContext, MockInterrupts, MockPort, MockTimer};

/// Identifier of a hardware interrupt source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct IrqSource(pub u16);

/// Interrupt handler entry: a plain function plus an opaque context pointer.
///
/// Raw function pointers keep the contract free of allocation and trait
/// objects, which matters for ports that build their vector tables in ROM.
pub type IrqHandler = fn(ctx: *const ());

/// Opaque per-target register snapshot sufficient to resume a thread.
///
/// A port's context type must contain every register the target needs
/// restored. The kernel creates one per thread, initializes it exactly once,
/// and never inspects its contents.
pub trait RegisterContext: Default + Send + 'static {
    /// Prepare this context so that, when installed, execution resumes at
    /// `entry` on the given stack with `arg0`/`arg1` in the target's first
    /// two argument registers.
    fn initialize(&mut self, stack_top: *mut u8, entry: usize, arg0: usize, arg1: usize);
}

/// Periodic hardware timer capability.
///
/// Counters narrower than 64 bits wrap; `width_bits` tells the kernel how
/// to mask deltas. Implementations that combine low/high register halves do
/// so internally and present a single `count` value.
pub trait HardwareTimer: Send + Sync {
    /// Current raw counter value.
    fn count(&self) -> u64;

    /// Overwrite the raw counter value.
    fn set_count(&self, count: u64);

    /// Counter value at which the timer fires and reloads.
    fn period(&self) -> u64;

    /// Program the fire/reload period, in counter ticks.
    fn set_period(&self, period: u64);

    /// Start counting.
    fn start(&self);

    /// Stop counting; the count is preserved.
    fn stop(&self);

    /// Usable counter width in bits (1..=64).
    fn width_bits(&self) -> u32;

    /// Input clock frequency in Hz.
    fn frequency_hz(&self) -> u64;

    /// Interrupt source this timer can raise, if any.
    fn irq_source(&self) -> Option<IrqSource>;
}

/// Interrupt controller capability.
///
/// `global_disable`/`global_enable` implement the process-wide critical
/// section protocol: `global_disable` returns the enabled state that existed
/// immediately before the call, and `global_enable(false)` must be a no-op —
/// only `global_enable(true)` re-enables. See [`crate::critical`].
pub trait InterruptController: Send + Sync {
    /// Bring up the interrupt subsystem. Returns `false` on failure, in
    /// which case no partial state may remain.
    fn init(&self) -> bool;

    /// Tear the subsystem back down (reverse of `init`).
    fn deinit(&self);

    /// Whether `init` has completed successfully.
    fn is_initialized(&self) -> bool;

    /// Claim `source` and attach `handler`. An already-claimed source is a
    /// recoverable resource-exhaustion condition.
    fn register_handler(
        &self,
        source: IrqSource,
        handler: IrqHandler,
        ctx: *const (),
    ) -> Result<(), InterruptError>;

    /// Release `source`; no-op if it was never claimed.
    fn remove_handler(&self, source: IrqSource);

    /// Acknowledge a pending interrupt so the source can fire again.
    fn acknowledge(&self, source: IrqSource);

    /// Mask all maskable interrupts; returns the prior enabled state.
    fn global_disable(&self) -> bool;

    /// Re-enable interrupts if `status` is `true`; no-op otherwise.
    fn global_enable(&self, status: bool);
}

/// A processor port: the bundle of capabilities the kernel is generic over,
/// plus the synchronous context-switch primitive used by voluntary
/// suspension (`yield`, `sleep`, blocking).
pub trait Port: 'static {
    /// Register snapshot type.
    type Context: RegisterContext;
    /// Periodic timer type.
    type Timer: HardwareTimer;
    /// Interrupt controller type.
    type Interrupts: InterruptController;

    /// Save the running register state into `prev` and resume from `next`.
    ///
    /// # Safety
    ///
    /// - `prev` and `next` must point to valid, properly aligned contexts
    ///   that stay alive for the duration of the call.
    /// - `next` must hold a resumable execution state.
    /// - Must be called with interrupts masked.
    unsafe fn context_switch(prev: *mut Self::Context, next: *const Self::Context);
}
