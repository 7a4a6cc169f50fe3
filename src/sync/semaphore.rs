//! Counting semaphore.
//!
//! Permit accounting happens inside the critical section; waiting happens
//! through the scheduler's block/ready primitives. Task-supplied code is
//! never invoked while the section is held, and every operation is at worst
//! O(waiters).
//!
//! Fairness is fixed at construction:
//!
//! - **Fair**: permits are granted in strict arrival order. A release
//!   checks waiters from the head only and hands permits over as it wakes
//!   them; a later waiter whose request would fit never barges past an
//!   earlier, larger one — not even through `acquire`'s fast path.
//! - **Unfair**: a release scans all waiters front-to-back (arrival order;
//!   the scan order is otherwise implementation-defined) and wakes every
//!   one whose request fits the instantaneous permit count. Woken threads
//!   re-check their own condition rather than assume success, and re-queue
//!   at the back if they lost the race. Throughput is better; a large
//!   early request can starve.

use spin::Mutex;

extern crate alloc;
use alloc::collections::VecDeque;

use crate::hal::Port;
use crate::sched::Scheduler;
use crate::thread::ThreadId;

struct Waiter {
    thread: ThreadId,
    requested: usize,
    /// Fair mode only: permits were already deducted on its behalf.
    granted: bool,
}

struct SemState {
    permits: usize,
    waiters: VecDeque<Waiter>,
}

/// Counting permit primitive.
pub struct Semaphore<'k, P: Port> {
    sched: &'k Scheduler<P>,
    fair: bool,
    inner: Mutex<SemState>,
}

impl<'k, P: Port> Semaphore<'k, P> {
    /// Create a semaphore holding `permits`, with the granting policy fixed
    /// for the object's lifetime.
    pub fn new(sched: &'k Scheduler<P>, permits: usize, fair: bool) -> Self {
        Self {
            sched,
            fair,
            inner: Mutex::new(SemState {
                permits,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Currently available permits.
    pub fn permits(&self) -> usize {
        let cs = self.sched.critical();
        let status = cs.disable();
        let permits = self.inner.lock().permits;
        cs.enable_with(status, permits)
    }

    /// Whether this semaphore grants in strict arrival order.
    pub fn is_fair(&self) -> bool {
        self.fair
    }

    /// Take `n` permits without blocking. Returns `false` when the request
    /// does not currently fit (or, on a fair semaphore, when earlier
    /// waiters are queued).
    pub fn try_acquire(&self, n: usize) -> bool {
        let cs = self.sched.critical();
        let status = cs.disable();
        let mut sem = self.inner.lock();
        let ok = sem.permits >= n && (!self.fair || sem.waiters.is_empty());
        if ok {
            sem.permits -= n;
        }
        drop(sem);
        cs.enable_with(status, ok)
    }

    /// Take one permit, blocking the calling thread until it is granted.
    pub fn acquire(&self) {
        self.acquire_many(1);
    }

    /// Take `n` permits, blocking the calling thread until the request is
    /// satisfiable under this semaphore's granting policy.
    pub fn acquire_many(&self, n: usize) {
        while !self.acquire_once(n) {}
    }

    /// One pass of `acquire_many`: take the permits (or collect a grant
    /// already made on our behalf) and return `true`, or park the calling
    /// thread as a waiter and return `false` once it is dispatched again.
    pub(crate) fn acquire_once(&self, n: usize) -> bool {
        let cs = self.sched.critical();
        let status = cs.disable();
        let mut sem = self.inner.lock();

        let me = match self.sched.current_thread() {
            Some(id) => id,
            None => panic!("semaphore acquire with no current thread"),
        };

        if let Some(pos) = sem.waiters.iter().position(|w| w.thread == me) {
            if sem.waiters[pos].granted {
                // A fair release already deducted permits for us.
                sem.waiters.remove(pos);
                drop(sem);
                return cs.enable_with(status, true);
            }
            // Still queued (a port that cannot transfer control resumed
            // us early): park again below.
        } else {
            let fits = sem.permits >= n && (!self.fair || sem.waiters.is_empty());
            if fits {
                sem.permits -= n;
                drop(sem);
                return cs.enable_with(status, true);
            }
            // An unfair wake removed our entry; losing the re-check race
            // lands us back at the tail of the queue.
            sem.waiters.push_back(Waiter {
                thread: me,
                requested: n,
                granted: false,
            });
        }
        drop(sem);

        self.sched.block_current(self as *const Self as usize);
        cs.enable(status);
        false
    }

    /// Return `n` permits and wake waiters per the granting policy.
    pub fn release(&self, n: usize) {
        let cs = self.sched.critical();
        let status = cs.disable();
        let mut sem = self.inner.lock();
        sem.permits = sem.permits.saturating_add(n);

        if self.fair {
            // Head-first: grant in arrival order while requests fit,
            // skipping entries already granted but not yet collected.
            let SemState { permits, waiters } = &mut *sem;
            for waiter in waiters.iter_mut() {
                if waiter.granted {
                    continue;
                }
                if waiter.requested > *permits {
                    break;
                }
                *permits -= waiter.requested;
                waiter.granted = true;
                self.sched.make_ready(waiter.thread);
            }
        } else {
            // Wake every waiter whose request currently fits; each re-checks
            // for itself, so permits are not deducted here.
            let mut i = 0;
            while i < sem.waiters.len() {
                if sem.waiters[i].requested <= sem.permits {
                    if let Some(waiter) = sem.waiters.remove(i) {
                        self.sched.make_ready(waiter.thread);
                    }
                } else {
                    i += 1;
                }
            }
        }
        drop(sem);
        cs.enable(status);
    }

    /// Number of threads currently queued.
    pub fn waiters(&self) -> usize {
        let cs = self.sched.critical();
        let status = cs.disable();
        let count = self.inner.lock().waiters.len();
        cs.enable_with(status, count)
    }
}
