//! Thread identity, state, and the caller-supplied task capability.

use portable_atomic::{AtomicI64, AtomicU8, AtomicUsize, Ordering};
use spin::Mutex;

use crate::hal::Port;
use crate::mem::{ArcLite, Stack};

pub mod handle;

pub use handle::JoinHandle;

/// Behavior supplied by application code to a thread.
///
/// The kernel never owns the task: threads hold a `&'static` reference and
/// the caller keeps the object alive for the thread's whole lifetime. The
/// entry operation runs exactly once; the thread reaches its terminal state
/// when it returns.
pub trait Task: Sync {
    /// Thread entry operation.
    fn run(&self);

    /// Stack requirement in bytes, fixed at task definition time.
    fn stack_size(&self) -> usize;
}

/// Unique thread identifier.
///
/// Assigned at creation from a monotonic counter, never reused, and unique
/// for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(core::num::NonZeroU64);

impl ThreadId {
    /// Wrap a raw identifier.
    ///
    /// # Safety
    ///
    /// `id` must be non-zero and must come from the scheduler's monotonic
    /// counter so that uniqueness holds.
    pub(crate) unsafe fn new_unchecked(id: u64) -> Self {
        Self(unsafe { core::num::NonZeroU64::new_unchecked(id) })
    }

    /// Raw identifier value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread execution state. `Dead` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Created but not yet started
    New = 0,
    /// Eligible for dispatch
    Runnable = 1,
    /// Currently executing; exactly one thread at any instant
    Running = 2,
    /// Waiting out a sleep deadline
    Sleeping = 3,
    /// Waiting on a resource
    Blocked = 4,
    /// Entry operation returned; never leaves this state
    Dead = 5,
}

impl ThreadState {
    fn from_u8(raw: u8) -> ThreadState {
        match raw {
            0 => ThreadState::New,
            1 => ThreadState::Runnable,
            2 => ThreadState::Running,
            3 => ThreadState::Sleeping,
            4 => ThreadState::Blocked,
            _ => ThreadState::Dead,
        }
    }
}

/// Shared handle to a thread record.
pub(crate) type ThreadRef<P> = ArcLite<ThreadRecord<P>>;

/// Per-thread kernel record.
///
/// The stack and register context are exclusively owned: allocated once
/// here, freed exactly once when the last reference to the record drops.
pub(crate) struct ThreadRecord<P: Port> {
    id: ThreadId,
    state: AtomicU8,
    priority: AtomicU8,
    stack: Stack,
    context: Mutex<P::Context>,
    task: &'static dyn Task,
    /// Nanoseconds left while Sleeping; decremented on every tick
    sleep_remaining: AtomicI64,
    /// Opaque token for the resource being waited on; 0 when not blocked
    blocked_on: AtomicUsize,
}

impl<P: Port> ThreadRecord<P> {
    pub(crate) fn new(id: ThreadId, stack: Stack, task: &'static dyn Task, priority: u8) -> Self {
        Self {
            id,
            state: AtomicU8::new(ThreadState::New as u8),
            priority: AtomicU8::new(priority),
            stack,
            context: Mutex::new(P::Context::default()),
            task,
            sleep_remaining: AtomicI64::new(0),
            blocked_on: AtomicUsize::new(0),
        }
    }

    pub(crate) fn id(&self) -> ThreadId {
        self.id
    }

    pub(crate) fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, new_state: ThreadState) {
        self.state.store(new_state as u8, Ordering::Release);
    }

    pub(crate) fn priority(&self) -> u8 {
        self.priority.load(Ordering::Acquire)
    }

    pub(crate) fn task(&self) -> &'static dyn Task {
        self.task
    }

    pub(crate) fn stack(&self) -> &Stack {
        &self.stack
    }

    pub(crate) fn sleep_remaining(&self) -> i64 {
        self.sleep_remaining.load(Ordering::Acquire)
    }

    pub(crate) fn set_sleep_remaining(&self, nanos: i64) {
        self.sleep_remaining.store(nanos, Ordering::Release);
    }

    pub(crate) fn blocked_on(&self) -> usize {
        self.blocked_on.load(Ordering::Acquire)
    }

    pub(crate) fn set_blocked_on(&self, token: usize) {
        self.blocked_on.store(token, Ordering::Release);
    }

    /// Run `f` against the owned register context.
    pub(crate) fn with_context<R>(&self, f: impl FnOnce(&mut P::Context) -> R) -> R {
        f(&mut self.context.lock())
    }

    /// Raw pointer to the owned register context, for the port's save and
    /// restore paths. The record outlives the pointer because the scheduler
    /// keeps a reference to every live thread.
    pub(crate) fn context_ptr(&self) -> *mut P::Context {
        let guard = self.context.lock();
        &*guard as *const P::Context as *mut P::Context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockPort;

    struct NopTask;
    impl Task for NopTask {
        fn run(&self) {}
        fn stack_size(&self) -> usize {
            1024
        }
    }

    static NOP: NopTask = NopTask;

    fn record(id: u64) -> ThreadRecord<MockPort> {
        let stack = Stack::allocate(NOP.stack_size()).unwrap();
        ThreadRecord::new(unsafe { ThreadId::new_unchecked(id) }, stack, &NOP, 128)
    }

    #[test]
    fn starts_in_new_state() {
        let rec = record(1);
        assert_eq!(rec.state(), ThreadState::New);
        assert_eq!(rec.priority(), 128);
        assert_eq!(rec.id().get(), 1);
    }

    #[test]
    fn state_round_trips() {
        let rec = record(2);
        for s in [
            ThreadState::Runnable,
            ThreadState::Running,
            ThreadState::Sleeping,
            ThreadState::Blocked,
            ThreadState::Dead,
        ] {
            rec.set_state(s);
            assert_eq!(rec.state(), s);
        }
    }

    #[test]
    fn context_initialized_through_accessor() {
        let rec = record(3);
        let sp = rec.stack().initial_sp();
        rec.with_context(|ctx| {
            crate::hal::RegisterContext::initialize(ctx, sp, 0x4000, 7, 9);
        });
        rec.with_context(|ctx| {
            assert_eq!(ctx.entry, 0x4000);
            assert_eq!(ctx.arg0, 7);
            assert_eq!(ctx.arg1, 9);
            assert_eq!(ctx.init_calls, 1);
        });
    }
}
