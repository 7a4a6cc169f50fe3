//! Software-only port for host-side testing.
//!
//! No context is ever really switched: `MockPort::context_switch` is a
//! no-op, the timer counter advances only when a test tells it to, and the
//! interrupt-enable state is a plain flag. This is enough to exercise every
//! piece of scheduler bookkeeping from ordinary test code.

use portable_atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use spin::Mutex;

extern crate alloc;
use alloc::collections::BTreeMap;

use super::{HardwareTimer, InterruptController, IrqHandler, IrqSource, Port, RegisterContext};
use crate::errors::InterruptError;

/// Register snapshot that records how it was initialized.
#[derive(Debug, Default)]
pub struct MockContext {
    /// Entry address passed to `initialize`
    pub entry: usize,
    /// Initial stack pointer passed to `initialize`
    pub stack_top: usize,
    /// First entry argument
    pub arg0: usize,
    /// Second entry argument
    pub arg1: usize,
    /// Number of times `initialize` ran (must end up at most 1)
    pub init_calls: usize,
}

impl RegisterContext for MockContext {
    fn initialize(&mut self, stack_top: *mut u8, entry: usize, arg0: usize, arg1: usize) {
        self.entry = entry;
        self.stack_top = stack_top as usize;
        self.arg0 = arg0;
        self.arg1 = arg1;
        self.init_calls += 1;
    }
}

/// Manually driven timer.
pub struct MockTimer {
    count: AtomicU64,
    period: AtomicU64,
    running: AtomicBool,
    frequency_hz: u64,
    width_bits: u32,
    irq: Option<IrqSource>,
}

impl MockTimer {
    /// Timer with the given input frequency and counter width, raising
    /// interrupt source 27 (an arbitrary private peripheral slot).
    pub fn new(frequency_hz: u64, width_bits: u32) -> Self {
        Self {
            count: AtomicU64::new(0),
            period: AtomicU64::new(0),
            running: AtomicBool::new(false),
            frequency_hz,
            width_bits,
            irq: Some(IrqSource(27)),
        }
    }

    /// Timer that cannot raise an interrupt.
    pub fn without_irq(frequency_hz: u64, width_bits: u32) -> Self {
        Self {
            irq: None,
            ..Self::new(frequency_hz, width_bits)
        }
    }

    /// Advance the counter by `delta` ticks, wrapping at the counter width.
    pub fn advance(&self, delta: u64) {
        let mask = if self.width_bits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width_bits) - 1
        };
        let next = self.count.load(Ordering::Acquire).wrapping_add(delta) & mask;
        self.count.store(next, Ordering::Release);
    }

    /// Whether `start` has been called without a matching `stop`.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl HardwareTimer for MockTimer {
    fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    fn set_count(&self, count: u64) {
        self.count.store(count, Ordering::Release);
    }

    fn period(&self) -> u64 {
        self.period.load(Ordering::Acquire)
    }

    fn set_period(&self, period: u64) {
        self.period.store(period, Ordering::Release);
    }

    fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn width_bits(&self) -> u32 {
        self.width_bits
    }

    fn frequency_hz(&self) -> u64 {
        self.frequency_hz
    }

    fn irq_source(&self) -> Option<IrqSource> {
        self.irq
    }
}

/// Interrupt controller backed by plain flags.
pub struct MockInterrupts {
    initialized: AtomicBool,
    enabled: AtomicBool,
    fail_init: bool,
    acks: AtomicUsize,
    handlers: Mutex<BTreeMap<IrqSource, (IrqHandler, usize)>>,
}

impl MockInterrupts {
    pub fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            fail_init: false,
            acks: AtomicUsize::new(0),
            handlers: Mutex::new(BTreeMap::new()),
        }
    }

    /// Controller whose `init` always fails, for bring-up rollback tests.
    pub fn failing() -> Self {
        Self {
            fail_init: true,
            ..Self::new()
        }
    }

    /// Whether maskable interrupts are currently enabled.
    pub fn interrupts_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Number of acknowledged interrupts.
    pub fn ack_count(&self) -> usize {
        self.acks.load(Ordering::Acquire)
    }

    /// Whether a handler is attached to `source`.
    pub fn has_handler(&self, source: IrqSource) -> bool {
        self.handlers.lock().contains_key(&source)
    }

    /// Invoke the handler registered for `source`, as hardware would.
    pub fn fire(&self, source: IrqSource) {
        let entry = self.handlers.lock().get(&source).copied();
        if let Some((handler, ctx)) = entry {
            handler(ctx as *const ());
        }
    }
}

impl Default for MockInterrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptController for MockInterrupts {
    fn init(&self) -> bool {
        if self.fail_init {
            return false;
        }
        self.initialized.store(true, Ordering::Release);
        true
    }

    fn deinit(&self) {
        self.handlers.lock().clear();
        self.initialized.store(false, Ordering::Release);
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn register_handler(
        &self,
        source: IrqSource,
        handler: IrqHandler,
        ctx: *const (),
    ) -> Result<(), InterruptError> {
        let mut handlers = self.handlers.lock();
        if handlers.contains_key(&source) {
            return Err(InterruptError::SourceClaimed(source));
        }
        handlers.insert(source, (handler, ctx as usize));
        Ok(())
    }

    fn remove_handler(&self, source: IrqSource) {
        self.handlers.lock().remove(&source);
    }

    fn acknowledge(&self, _source: IrqSource) {
        self.acks.fetch_add(1, Ordering::AcqRel);
    }

    fn global_disable(&self) -> bool {
        self.enabled.swap(false, Ordering::AcqRel)
    }

    fn global_enable(&self, status: bool) {
        if status {
            self.enabled.store(true, Ordering::Release);
        }
    }
}

/// Port used by the test suite: no-op context switches.
pub struct MockPort;

impl Port for MockPort {
    type Context = MockContext;
    type Timer = MockTimer;
    type Interrupts = MockInterrupts;

    unsafe fn context_switch(_prev: *mut MockContext, _next: *const MockContext) {
        // Control never actually transfers on the mock port.
    }
}
