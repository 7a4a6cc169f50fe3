//! The dispatcher.
//!
//! The scheduler is registered as the handler of the periodic hardware
//! timer interrupt. Each tick it advances the clock, credits sleepers,
//! rotates the interrupted thread to the back of its priority class, and
//! selects the next thread: strict priority precedence across classes,
//! FIFO round-robin within one. Voluntary suspension (`yield`, sleep,
//! blocking) performs the same selection synchronously with interrupts
//! masked.
//!
//! Interrupt-context discipline: the tick path mutates only the bookkeeping
//! sets — it never allocates fresh memory, never blocks, and never calls
//! task-supplied code. The actual register hand-off belongs to the port:
//! its interrupt trampoline saves the interrupted registers through
//! [`Scheduler::current_context_ptr`] before calling
//! [`Scheduler::preempt`], and restores through the same pointer
//! afterwards. Voluntary suspension uses [`Port::context_switch`] directly.
//!
//! All shared state lives behind one coarse, short-held lock taken with
//! interrupts masked; there is no finer-grained locking and no nesting
//! beyond matched disable/enable pairs.

use portable_atomic::{AtomicU64, Ordering};
use spin::{Mutex, MutexGuard};

extern crate alloc;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use super::priority;
use crate::critical::CriticalSection;
use crate::errors::{InterruptError, KernelError, KernelResult, SpawnError, TimerError};
use crate::hal::{HardwareTimer, InterruptController, Port, RegisterContext};
use crate::mem::{ArcLite, Stack};
use crate::thread::{Task, ThreadId, ThreadRecord, ThreadRef, ThreadState};
use crate::time::{Clock, Duration, NANOS_PER_SEC};

/// Stack for the idle thread, which only spins waiting for the next tick.
const IDLE_STACK_SIZE: usize = 1024;

/// The dedicated lowest-priority thread dispatched when nothing is
/// runnable. It never terminates and never sleeps or blocks.
struct IdleTask;

impl Task for IdleTask {
    fn run(&self) {
        // A port would execute its wait-for-interrupt instruction here.
        loop {
            core::hint::spin_loop();
        }
    }

    fn stack_size(&self) -> usize {
        IDLE_STACK_SIZE
    }
}

static IDLE_TASK: IdleTask = IdleTask;

/// Scheduler bookkeeping, guarded by one lock taken under the critical
/// section.
struct SchedState<P: Port> {
    clock: Clock,
    /// Every live thread, idle included
    threads: BTreeMap<ThreadId, ThreadRef<P>>,
    /// Runnable threads per priority, FIFO within a class
    ready: BTreeMap<u8, VecDeque<ThreadId>>,
    /// Threads waiting out a sleep deadline
    sleeping: Vec<ThreadId>,
    /// Threads blocked on another thread's death, keyed by target
    join_waiters: BTreeMap<ThreadId, Vec<ThreadId>>,
    /// The one Running thread, if any context is active
    current: Option<ThreadId>,
    idle: ThreadId,
}

impl<P: Port> SchedState<P> {
    fn thread(&self, id: ThreadId) -> Option<ThreadRef<P>> {
        self.threads.get(&id).cloned()
    }

    fn thread_or_die(&self, id: ThreadId) -> ThreadRef<P> {
        self.thread(id)
            .unwrap_or_else(|| panic!("scheduler state corrupt: thread {} missing", id))
    }

    fn enqueue_ready(&mut self, id: ThreadId, priority: u8) {
        self.ready
            .entry(priority)
            .or_insert_with(|| VecDeque::with_capacity(8))
            .push_back(id);
    }

    fn take_next_ready(&mut self) -> Option<ThreadId> {
        let prio = *self
            .ready
            .iter()
            .rev()
            .find(|(_, q)| !q.is_empty())
            .map(|(p, _)| p)?;
        self.ready.get_mut(&prio)?.pop_front()
    }
}

/// Priority-preemptive round-robin dispatcher over a processor port.
///
/// Owns the hardware timer and interrupt controller capabilities handed to
/// it at bring-up; there is no ambient global scheduler — callers hold an
/// explicit reference.
pub struct Scheduler<P: Port> {
    interrupts: P::Interrupts,
    timer: P::Timer,
    quantum_ns: u64,
    next_id: AtomicU64,
    switches: AtomicU64,
    state: Mutex<SchedState<P>>,
}

impl<P: Port> Scheduler<P> {
    /// Construct the dispatcher and its idle thread.
    ///
    /// Fails cleanly — handing back the capabilities untouched — when the
    /// interrupt subsystem has not completed initialization, the timer
    /// frequency is unusable, or the idle stack cannot be allocated.
    pub(crate) fn new(
        interrupts: P::Interrupts,
        timer: P::Timer,
        quantum: Duration,
    ) -> Result<Self, (P::Interrupts, P::Timer, KernelError)> {
        if !interrupts.is_initialized() {
            return Err((interrupts, timer, InterruptError::NotInitialized.into()));
        }
        let clock = match Clock::new(timer.frequency_hz(), timer.width_bits()) {
            Ok(clock) => clock,
            Err(err) => return Err((interrupts, timer, err)),
        };
        let Some(idle_stack) = Stack::allocate(IDLE_TASK.stack_size()) else {
            return Err((interrupts, timer, SpawnError::OutOfMemory.into()));
        };

        let idle_id = unsafe { ThreadId::new_unchecked(1) };
        let idle = ArcLite::new(ThreadRecord::new(
            idle_id,
            idle_stack,
            &IDLE_TASK,
            priority::IDLE,
        ));
        idle.set_state(ThreadState::Runnable);

        let mut threads = BTreeMap::new();
        threads.insert(idle_id, idle);

        log::info!(
            "scheduler up: quantum {} us, timer {} Hz",
            quantum.as_micros(),
            timer.frequency_hz()
        );

        Ok(Self {
            interrupts,
            timer,
            quantum_ns: quantum.as_nanos(),
            next_id: AtomicU64::new(2),
            switches: AtomicU64::new(0),
            state: Mutex::new(SchedState {
                clock,
                threads,
                ready: BTreeMap::new(),
                sleeping: Vec::new(),
                join_waiters: BTreeMap::new(),
                current: None,
                idle: idle_id,
            }),
        })
    }

    /// The owned timer capability, for port glue and board code.
    pub fn timer(&self) -> &P::Timer {
        &self.timer
    }

    /// The owned interrupt controller capability.
    pub fn interrupts(&self) -> &P::Interrupts {
        &self.interrupts
    }

    /// Critical section over this scheduler's interrupt controller.
    pub fn critical(&self) -> CriticalSection<'_, P::Interrupts> {
        CriticalSection::new(&self.interrupts)
    }

    /// Configured scheduling quantum.
    pub fn quantum(&self) -> Duration {
        Duration::from_nanos(self.quantum_ns)
    }

    /// Identifier of the idle thread.
    pub fn idle_thread(&self) -> ThreadId {
        let cs = self.critical();
        let status = cs.disable();
        let idle = self.state.lock().idle;
        cs.enable_with(status, idle)
    }

    /// Mint the next thread identifier. Identifiers strictly increase and
    /// are never reused.
    pub(crate) fn allocate_id(&self) -> ThreadId {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        // Starts at 2 and only increments, so never zero.
        unsafe { ThreadId::new_unchecked(id) }
    }

    /// Prepare a thread's register context to enter at the kernel
    /// trampoline with this scheduler and the thread's id as arguments.
    pub(crate) fn init_thread_context(&self, record: &ThreadRecord<P>) {
        let sp = record.stack().initial_sp();
        let entry = thread_trampoline::<P> as *const () as usize;
        let sched_ptr = self as *const Self as usize;
        let id = record.id().get() as usize;
        record.with_context(|ctx| ctx.initialize(sp, entry, sched_ptr, id));
    }

    /// Bind the idle thread's context once the scheduler address is final.
    pub(crate) fn bind_idle(&self) {
        let cs = self.critical();
        let status = cs.disable();
        let idle = {
            let st = self.state.lock();
            st.thread_or_die(st.idle)
        };
        cs.enable(status);
        self.init_thread_context(&idle);
    }

    /// Add a New thread to the registry.
    pub(crate) fn register(&self, record: ThreadRef<P>) {
        let cs = self.critical();
        let status = cs.disable();
        self.state.lock().threads.insert(record.id(), record);
        cs.enable(status);
    }

    /// Transition a thread from New to Runnable and queue it for dispatch.
    pub(crate) fn start_thread(&self, id: ThreadId) -> KernelResult<()> {
        let cs = self.critical();
        let status = cs.disable();
        let mut st = self.state.lock();
        let Some(record) = st.thread(id) else {
            drop(st);
            return cs.enable_with(status, Err(SpawnError::UnknownThread.into()));
        };
        if record.state() != ThreadState::New {
            drop(st);
            return cs.enable_with(status, Err(SpawnError::AlreadyStarted.into()));
        }
        record.set_state(ThreadState::Runnable);
        st.enqueue_ready(id, record.priority());
        drop(st);
        cs.enable_with(status, Ok(()))
    }

    /// Program the periodic timer to the scheduling quantum and start it.
    pub(crate) fn start_timer(&self) -> KernelResult<()> {
        if self.timer.irq_source().is_none() {
            return Err(TimerError::NoInterruptSource.into());
        }
        let period = self.timer.frequency_hz() as u128 * self.quantum_ns as u128
            / NANOS_PER_SEC as u128;
        let width = self.timer.width_bits();
        let max = if width >= 64 {
            u64::MAX as u128
        } else {
            (1u128 << width) - 1
        };
        if period == 0 || period > max {
            return Err(TimerError::PeriodOutOfRange.into());
        }
        self.timer.set_period(period as u64);
        self.timer.start();
        Ok(())
    }

    /// Register this scheduler as the timer's interrupt handler.
    ///
    /// # Safety
    ///
    /// The scheduler must not move or drop while the handler is attached —
    /// in practice it lives in a static for the lifetime of the system.
    pub unsafe fn attach(&self) -> KernelResult<()> {
        let source = self
            .timer
            .irq_source()
            .ok_or(KernelError::Timer(TimerError::NoInterruptSource))?;
        self.interrupts
            .register_handler(source, dispatch_trampoline::<P>, self as *const Self as *const ())?;
        Ok(())
    }

    /// Remove the dispatch handler from the timer's interrupt source.
    pub fn detach(&self) {
        if let Some(source) = self.timer.irq_source() {
            self.interrupts.remove_handler(source);
        }
    }

    /// Reverse of bring-up: stop the tick, drop the handler, deinitialize
    /// the interrupt subsystem.
    pub(crate) fn tear_down(self) {
        self.timer.stop();
        self.detach();
        self.interrupts.deinit();
    }

    /// Timer-tick dispatch, executed in interrupt context.
    ///
    /// The port's interrupt trampoline has already saved the interrupted
    /// registers into the current thread's context; after this returns it
    /// reloads from [`Self::current_context_ptr`], which completes the
    /// hand-off when the selection changed.
    pub fn preempt(&self) {
        let cs = self.critical();
        let status = cs.disable();
        let mut st = self.state.lock();

        let elapsed = {
            let count = self.timer.count();
            st.clock.update(count)
        };
        self.wake_sleepers_locked(&mut st, elapsed);

        // Quantum expiry: the interrupted thread rotates to the back of its
        // priority class.
        let prev = st.current.take();
        if let Some(prev_id) = prev {
            let record = st.thread_or_die(prev_id);
            if record.state() == ThreadState::Running {
                record.set_state(ThreadState::Runnable);
                if prev_id != st.idle {
                    let prio = record.priority();
                    st.enqueue_ready(prev_id, prio);
                }
            }
        }

        let next = self.select_locked(&mut st);
        if prev != Some(next) {
            self.switches.fetch_add(1, Ordering::Relaxed);
        }
        drop(st);

        if let Some(source) = self.timer.irq_source() {
            self.interrupts.acknowledge(source);
        }
        cs.enable(status);
    }

    /// Pointer to the context of the thread that owns the CPU, for the
    /// port's save/restore paths.
    pub fn current_context_ptr(&self) -> *mut P::Context {
        let cs = self.critical();
        let status = cs.disable();
        let st = self.state.lock();
        let id = st.current.unwrap_or(st.idle);
        let ptr = st.thread_or_die(id).context_ptr();
        drop(st);
        cs.enable_with(status, ptr)
    }

    /// Force an immediate re-dispatch without waiting for the next tick.
    ///
    /// Selection runs with interrupts masked to keep dispatch from
    /// re-entering itself; with no current thread this bootstraps the first
    /// dispatch and, on a real port, never returns to the boot stack.
    pub fn yield_now(&self) {
        let cs = self.critical();
        let status = cs.disable();
        let mut st = self.state.lock();

        let prev = st.current.take();
        let prev_ctx = prev.map(|id| {
            let record = st.thread_or_die(id);
            if record.state() == ThreadState::Running {
                record.set_state(ThreadState::Runnable);
                if id != st.idle {
                    let prio = record.priority();
                    st.enqueue_ready(id, prio);
                }
            }
            record.context_ptr()
        });

        self.finish_switch(st, prev_ctx, status);
    }

    /// Put the current thread to sleep for at least `duration`.
    pub(crate) fn sleep_current(&self, duration: Duration) {
        let cs = self.critical();
        let status = cs.disable();
        let mut st = self.state.lock();

        let id = match st.current.take() {
            Some(id) => id,
            None => panic!("sleep with no current thread"),
        };
        if id == st.idle {
            panic!("idle thread cannot sleep");
        }
        let record = st.thread_or_die(id);
        record.set_state(ThreadState::Sleeping);
        record.set_sleep_remaining(duration.as_nanos().min(i64::MAX as u64) as i64);
        st.sleeping.push(id);

        let prev_ctx = record.context_ptr();
        self.finish_switch(st, Some(prev_ctx), status);
    }

    /// Block the current thread on the resource identified by `token`.
    ///
    /// The caller has already queued the thread with the resource; control
    /// returns here only once the thread was made ready and re-selected.
    pub(crate) fn block_current(&self, token: usize) {
        let cs = self.critical();
        let status = cs.disable();
        let mut st = self.state.lock();

        let id = match st.current.take() {
            Some(id) => id,
            None => panic!("block with no current thread"),
        };
        if id == st.idle {
            panic!("idle thread cannot block");
        }
        let record = st.thread_or_die(id);
        record.set_state(ThreadState::Blocked);
        record.set_blocked_on(token);

        let prev_ctx = record.context_ptr();
        self.finish_switch(st, Some(prev_ctx), status);
    }

    /// Make a sleeping or blocked thread runnable again.
    pub(crate) fn make_ready(&self, id: ThreadId) {
        let cs = self.critical();
        let status = cs.disable();
        let mut st = self.state.lock();
        if let Some(record) = st.thread(id) {
            match record.state() {
                ThreadState::Sleeping | ThreadState::Blocked => {
                    record.set_state(ThreadState::Runnable);
                    record.set_blocked_on(0);
                    record.set_sleep_remaining(0);
                    st.sleeping.retain(|t| *t != id);
                    st.enqueue_ready(id, record.priority());
                }
                _ => {}
            }
        }
        drop(st);
        cs.enable(status);
    }

    /// One pass of join: returns `true` once the target is Dead (or was
    /// already removed), otherwise parks the caller on the target's death
    /// event and dispatches away.
    pub(crate) fn join_once(&self, target: ThreadId) -> bool {
        let cs = self.critical();
        let status = cs.disable();
        let mut st = self.state.lock();

        let done = match st.thread(target) {
            None => true,
            Some(record) => record.state() == ThreadState::Dead,
        };
        if done {
            drop(st);
            return cs.enable_with(status, true);
        }

        let id = match st.current.take() {
            Some(id) => id,
            None => panic!("join with no current thread"),
        };
        if id == target {
            panic!("thread {} cannot join itself", id);
        }
        if id == st.idle {
            panic!("idle thread cannot block");
        }
        let record = st.thread_or_die(id);
        record.set_state(ThreadState::Blocked);
        record.set_blocked_on(target.get() as usize);
        st.join_waiters.entry(target).or_insert_with(Vec::new).push(id);

        let prev_ctx = record.context_ptr();
        self.finish_switch(st, Some(prev_ctx), status);
        false
    }

    /// Block until the target thread's entry operation has returned.
    pub(crate) fn join(&self, target: ThreadId) {
        while !self.join_once(target) {}
    }

    /// Terminate the current thread: mark it Dead, release every joiner,
    /// and dispatch away. The dead context is never resumed.
    pub(crate) fn exit_current(&self) {
        let cs = self.critical();
        let status = cs.disable();
        let mut st = self.state.lock();

        let id = match st.current.take() {
            Some(id) => id,
            None => panic!("exit with no current thread"),
        };
        if id == st.idle {
            panic!("idle thread must never terminate");
        }
        let record = st.thread_or_die(id);
        record.set_state(ThreadState::Dead);

        if let Some(waiters) = st.join_waiters.remove(&id) {
            for waiter in waiters {
                if let Some(record) = st.thread(waiter) {
                    if record.state() == ThreadState::Blocked {
                        record.set_state(ThreadState::Runnable);
                        record.set_blocked_on(0);
                        st.enqueue_ready(waiter, record.priority());
                    }
                }
            }
        }

        self.finish_switch(st, None, status);
    }

    /// Detach a Dead thread from all bookkeeping.
    ///
    /// Calling this on a thread that has not reached Dead is fatal: its
    /// stack and register context may be the ones currently loaded.
    pub fn remove(&self, id: ThreadId) {
        let cs = self.critical();
        let status = cs.disable();
        let mut st = self.state.lock();
        if let Some(record) = st.threads.get(&id) {
            if record.state() != ThreadState::Dead {
                panic!("removing live thread {}", id);
            }
            st.threads.remove(&id);
            st.join_waiters.remove(&id);
        }
        drop(st);
        cs.enable(status);
    }

    /// The thread currently owning the CPU, if dispatch has run.
    pub fn current_thread(&self) -> Option<ThreadId> {
        let cs = self.critical();
        let status = cs.disable();
        let current = self.state.lock().current;
        cs.enable_with(status, current)
    }

    /// Scheduling state of a registered thread.
    pub fn thread_state(&self, id: ThreadId) -> Option<ThreadState> {
        let cs = self.critical();
        let status = cs.disable();
        let state = self.state.lock().thread(id).map(|r| r.state());
        cs.enable_with(status, state)
    }

    /// Priority of a registered thread.
    pub fn thread_priority(&self, id: ThreadId) -> Option<u8> {
        let cs = self.critical();
        let status = cs.disable();
        let prio = self.state.lock().thread(id).map(|r| r.priority());
        cs.enable_with(status, prio)
    }

    /// Thread counts: `(total, runnable, blocked_or_sleeping)`.
    pub fn stats(&self) -> (usize, usize, usize) {
        let cs = self.critical();
        let status = cs.disable();
        let st = self.state.lock();
        let total = st.threads.len();
        let mut runnable = 0;
        let mut waiting = 0;
        for record in st.threads.values() {
            match record.state() {
                ThreadState::Runnable | ThreadState::Running => runnable += 1,
                ThreadState::Blocked | ThreadState::Sleeping => waiting += 1,
                _ => {}
            }
        }
        drop(st);
        cs.enable_with(status, (total, runnable, waiting))
    }

    /// Context switches performed since bring-up.
    pub fn context_switches(&self) -> u64 {
        self.switches.load(Ordering::Relaxed)
    }

    /// Monotonic nanoseconds since bring-up.
    ///
    /// Forces one clock update against the live counter, so reads are fresh
    /// even between ticks.
    pub fn nano_time(&self) -> u64 {
        let cs = self.critical();
        let status = cs.disable();
        let mut st = self.state.lock();
        let count = self.timer.count();
        st.clock.update(count);
        let time = st.clock.time();
        drop(st);
        cs.enable_with(status, time)
    }

    /// Run a freshly dispatched thread's entry operation, then terminate
    /// it. Entered via the port trampoline; `self` stays valid because the
    /// scheduler outlives every thread it created.
    pub(crate) fn run_entry(&self, id: ThreadId) {
        let task = {
            let cs = self.critical();
            let status = cs.disable();
            let task = self.state.lock().thread_or_die(id).task();
            cs.enable_with(status, task)
        };
        task.run();
        self.exit_current();
        // The dead context is never resumed; only a port that cannot
        // transfer control (the mock) falls through to here.
        loop {
            core::hint::spin_loop();
        }
    }

    fn wake_sleepers_locked(&self, st: &mut SchedState<P>, elapsed: u64) {
        let elapsed = elapsed.min(i64::MAX as u64) as i64;
        let mut i = 0;
        while i < st.sleeping.len() {
            let id = st.sleeping[i];
            let Some(record) = st.thread(id) else {
                st.sleeping.swap_remove(i);
                continue;
            };
            let remaining = record.sleep_remaining() - elapsed;
            if remaining <= 0 {
                record.set_sleep_remaining(0);
                record.set_state(ThreadState::Runnable);
                st.sleeping.swap_remove(i);
                st.enqueue_ready(id, record.priority());
            } else {
                record.set_sleep_remaining(remaining);
                i += 1;
            }
        }
    }

    /// Select the next thread and mark it Running. `st.current` must be
    /// vacated first; falls back to the idle thread.
    fn select_locked(&self, st: &mut SchedState<P>) -> ThreadId {
        let next = st.take_next_ready().unwrap_or(st.idle);
        let record = st.thread_or_die(next);
        record.set_state(ThreadState::Running);
        st.current = Some(next);
        next
    }

    /// Common tail of every voluntary suspension: select, unlock, restore
    /// the interrupt state, and hand the CPU over.
    fn finish_switch(
        &self,
        mut st: MutexGuard<'_, SchedState<P>>,
        prev_ctx: Option<*mut P::Context>,
        status: bool,
    ) {
        let next = self.select_locked(&mut st);
        let next_ctx = st.thread_or_die(next).context_ptr();
        drop(st);
        self.critical().enable(status);

        match prev_ctx {
            // Reselected: nothing to hand over.
            Some(prev) if prev == next_ctx => {}
            Some(prev) => {
                self.switches.fetch_add(1, Ordering::Relaxed);
                unsafe { P::context_switch(prev, next_ctx) };
            }
            None => {
                // No context to save: first dispatch from the boot stack,
                // or a terminated thread. On a real port this never
                // returns.
                self.switches.fetch_add(1, Ordering::Relaxed);
                let mut scratch = P::Context::default();
                unsafe { P::context_switch(&mut scratch, next_ctx) };
            }
        }
    }
}

/// First-entry trampoline installed into every thread's register context.
extern "C" fn thread_trampoline<P: Port>(sched_ptr: usize, id_raw: usize) {
    let sched = unsafe { &*(sched_ptr as *const Scheduler<P>) };
    let id = unsafe { ThreadId::new_unchecked(id_raw as u64) };
    sched.run_entry(id);
}

/// Timer-interrupt trampoline registered by [`Scheduler::attach`].
fn dispatch_trampoline<P: Port>(ctx: *const ()) {
    let sched = unsafe { &*(ctx as *const Scheduler<P>) };
    sched.preempt();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{MockInterrupts, MockPort, MockTimer};

    struct NopTask;
    impl Task for NopTask {
        fn run(&self) {}
        fn stack_size(&self) -> usize {
            2048
        }
    }
    static NOP: NopTask = NopTask;

    /// 1 MHz timer: 1000 counts per 1 ms quantum.
    fn sched() -> Scheduler<MockPort> {
        let interrupts = MockInterrupts::new();
        assert!(interrupts.init());
        let timer = MockTimer::new(1_000_000, 32);
        match Scheduler::new(interrupts, timer, Duration::from_millis(1)) {
            Ok(s) => s,
            Err(_) => panic!("scheduler construction failed"),
        }
    }

    fn spawn(s: &Scheduler<MockPort>, prio: u8) -> ThreadId {
        let id = s.allocate_id();
        let stack = Stack::allocate(NOP.stack_size()).unwrap();
        let record = ArcLite::new(ThreadRecord::new(id, stack, &NOP, prio));
        s.init_thread_context(&record);
        s.register(record);
        s.start_thread(id).unwrap();
        id
    }

    /// Advance the mock timer one quantum and fire the tick.
    fn tick(s: &Scheduler<MockPort>) {
        s.timer().advance(1000);
        s.preempt();
    }

    #[test]
    fn construction_requires_initialized_interrupts() {
        let interrupts = MockInterrupts::new(); // init() never called
        let timer = MockTimer::new(1_000_000, 32);
        let err = match Scheduler::<MockPort>::new(interrupts, timer, Duration::from_millis(1)) {
            Ok(_) => panic!("construction must fail"),
            Err((_, _, err)) => err,
        };
        assert_eq!(
            err,
            KernelError::Interrupt(InterruptError::NotInitialized)
        );
    }

    #[test]
    fn idle_runs_when_nothing_is_runnable() {
        let s = sched();
        tick(&s);
        assert_eq!(s.current_thread(), Some(s.idle_thread()));
    }

    #[test]
    fn start_twice_is_an_error() {
        let s = sched();
        let id = spawn(&s, priority::NORM);
        assert_eq!(
            s.start_thread(id),
            Err(KernelError::Spawn(SpawnError::AlreadyStarted))
        );
    }

    #[test]
    fn thread_ids_strictly_increase() {
        let s = sched();
        let a = spawn(&s, priority::NORM);
        let b = spawn(&s, priority::NORM);
        assert!(b.get() > a.get());
    }

    #[test]
    fn round_robin_is_fair_within_a_priority_class() {
        let s = sched();
        let ids = [
            spawn(&s, priority::NORM),
            spawn(&s, priority::NORM),
            spawn(&s, priority::NORM),
        ];

        let mut counts = BTreeMap::new();
        for _ in 0..6 {
            tick(&s);
            let current = s.current_thread().unwrap();
            *counts.entry(current).or_insert(0u32) += 1;
        }
        for id in ids {
            assert_eq!(counts.get(&id), Some(&2), "thread {} dispatch count", id);
        }
    }

    #[test]
    fn fifo_order_within_a_priority_class() {
        let s = sched();
        let a = spawn(&s, priority::NORM);
        let b = spawn(&s, priority::NORM);
        tick(&s);
        assert_eq!(s.current_thread(), Some(a));
        tick(&s);
        assert_eq!(s.current_thread(), Some(b));
        tick(&s);
        assert_eq!(s.current_thread(), Some(a));
    }

    #[test]
    fn higher_priority_always_preempts() {
        let s = sched();
        let low = spawn(&s, priority::LOW);
        tick(&s);
        assert_eq!(s.current_thread(), Some(low));

        let high = spawn(&s, priority::HIGH);
        for _ in 0..5 {
            tick(&s);
            // The low thread never runs while the high one is runnable.
            assert_eq!(s.current_thread(), Some(high));
        }
    }

    #[test]
    fn lower_priority_resumes_when_higher_sleeps() {
        let s = sched();
        let low = spawn(&s, priority::LOW);
        let high = spawn(&s, priority::HIGH);
        tick(&s);
        assert_eq!(s.current_thread(), Some(high));

        s.sleep_current(Duration::from_millis(3));
        assert_eq!(s.thread_state(high), Some(ThreadState::Sleeping));
        assert_eq!(s.current_thread(), Some(low));

        tick(&s);
        tick(&s);
        assert_eq!(s.current_thread(), Some(low));
        tick(&s);
        // Deadline reached: the high thread takes back over.
        assert_eq!(s.current_thread(), Some(high));
    }

    #[test]
    fn yield_rotates_equal_priorities_immediately() {
        let s = sched();
        let a = spawn(&s, priority::NORM);
        let b = spawn(&s, priority::NORM);
        tick(&s);
        assert_eq!(s.current_thread(), Some(a));

        let before = s.context_switches();
        s.yield_now();
        assert_eq!(s.current_thread(), Some(b));
        assert!(s.context_switches() > before);

        s.yield_now();
        assert_eq!(s.current_thread(), Some(a));
    }

    #[test]
    fn sleepers_wake_in_deadline_order() {
        let s = sched();
        let t5 = spawn(&s, priority::NORM);
        let t2 = spawn(&s, priority::NORM);
        let t1 = spawn(&s, priority::NORM);

        // Walk each thread into its sleep as it becomes current.
        tick(&s);
        assert_eq!(s.current_thread(), Some(t5));
        s.sleep_current(Duration::from_secs(5));
        assert_eq!(s.current_thread(), Some(t2));
        s.sleep_current(Duration::from_secs(2));
        assert_eq!(s.current_thread(), Some(t1));
        s.sleep_current(Duration::from_secs(1));
        assert_eq!(s.current_thread(), Some(s.idle_thread()));

        // Tick once per quantum and record each first wake.
        let mut wake_order = Vec::new();
        for _ in 0..5200 {
            tick(&s);
            let current = s.current_thread().unwrap();
            if current != s.idle_thread() && !wake_order.contains(&current) {
                wake_order.push(current);
            }
        }
        assert_eq!(wake_order, [t1, t2, t5]);
    }

    #[test]
    fn sleep_decrements_by_elapsed_time() {
        let s = sched();
        let t = spawn(&s, priority::NORM);
        tick(&s);
        s.sleep_current(Duration::from_millis(10));

        // 4 ms of ticks: still sleeping.
        for _ in 0..4 {
            tick(&s);
        }
        assert_eq!(s.thread_state(t), Some(ThreadState::Sleeping));

        for _ in 0..6 {
            tick(&s);
        }
        assert_eq!(s.thread_state(t), Some(ThreadState::Running));
    }

    #[test]
    fn join_parks_until_target_dies_and_releases_all_joiners() {
        let s = sched();
        let j1 = spawn(&s, priority::NORM);
        let j2 = spawn(&s, priority::NORM);
        let target = spawn(&s, priority::NORM);

        tick(&s);
        assert_eq!(s.current_thread(), Some(j1));
        assert!(!s.join_once(target));
        assert_eq!(s.thread_state(j1), Some(ThreadState::Blocked));

        assert_eq!(s.current_thread(), Some(j2));
        assert!(!s.join_once(target));
        assert_eq!(s.thread_state(j2), Some(ThreadState::Blocked));

        assert_eq!(s.current_thread(), Some(target));
        s.exit_current();
        assert_eq!(s.thread_state(target), Some(ThreadState::Dead));

        // Both joiners released: the first took the CPU straight from the
        // dying thread, the second queued behind it. Joining the dead
        // target now succeeds immediately for each of them.
        assert_eq!(s.thread_state(j1), Some(ThreadState::Running));
        assert_eq!(s.thread_state(j2), Some(ThreadState::Runnable));
        assert!(s.join_once(target));
        tick(&s);
        assert_eq!(s.current_thread(), Some(j2));
        assert!(s.join_once(target));
    }

    #[test]
    fn dead_thread_is_unreachable_from_dispatch() {
        let s = sched();
        let a = spawn(&s, priority::NORM);
        let b = spawn(&s, priority::NORM);
        tick(&s);
        assert_eq!(s.current_thread(), Some(a));
        s.exit_current();

        for _ in 0..4 {
            tick(&s);
            assert_eq!(s.current_thread(), Some(b));
        }
    }

    #[test]
    fn remove_detaches_a_dead_thread() {
        let s = sched();
        let a = spawn(&s, priority::NORM);
        tick(&s);
        s.exit_current();

        let (total_before, _, _) = s.stats();
        s.remove(a);
        let (total_after, _, _) = s.stats();
        assert_eq!(total_after, total_before - 1);
        assert_eq!(s.thread_state(a), None);
    }

    #[test]
    #[should_panic(expected = "removing live thread")]
    fn removing_a_live_thread_is_fatal() {
        let s = sched();
        let a = spawn(&s, priority::NORM);
        s.remove(a);
    }

    #[test]
    #[should_panic(expected = "no current thread")]
    fn sleeping_with_no_current_thread_is_fatal() {
        let s = sched();
        s.sleep_current(Duration::from_millis(1));
    }

    #[test]
    fn stats_track_thread_states() {
        let s = sched();
        let _a = spawn(&s, priority::NORM);
        let b = spawn(&s, priority::NORM);
        tick(&s);
        s.sleep_current(Duration::from_secs(1)); // parks _a
        let _ = b;

        // idle + two spawned threads
        let (total, runnable, waiting) = s.stats();
        assert_eq!(total, 3);
        assert_eq!(runnable, 2); // b running, idle runnable
        assert_eq!(waiting, 1);
    }

    #[test]
    fn nano_time_is_fresh_between_ticks() {
        let s = sched();
        tick(&s);
        let before = s.nano_time();
        // Half a quantum: no tick fired, the read still sees it.
        s.timer().advance(500);
        let after = s.nano_time();
        assert_eq!(after - before, 500_000);
    }
}
