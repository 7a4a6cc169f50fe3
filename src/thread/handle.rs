//! Handle for observing and joining a thread.

use super::{ThreadRecord, ThreadRef, ThreadState};
use crate::hal::Port;

/// A cloneable handle to a spawned thread.
///
/// Holding or dropping a handle never affects the thread's execution; it
/// only provides identity, state observation, and a target for
/// [`Kernel::join`](crate::kernel::Kernel::join). Several threads may each
/// hold a clone and join the same target; all of them are released when it
/// dies.
pub struct JoinHandle<P: Port> {
    pub(crate) inner: ThreadRef<P>,
}

impl<P: Port> JoinHandle<P> {
    pub(crate) fn new(inner: ThreadRef<P>) -> Self {
        Self { inner }
    }

    /// Identifier of the thread this handle refers to.
    pub fn thread_id(&self) -> super::ThreadId {
        self.inner.id()
    }

    /// Whether the thread's entry operation has returned.
    pub fn is_finished(&self) -> bool {
        self.inner.state() == ThreadState::Dead
    }

    /// Current scheduling state.
    pub fn state(&self) -> ThreadState {
        self.inner.state()
    }

    /// Scheduling priority.
    pub fn priority(&self) -> u8 {
        self.inner.priority()
    }

    pub(crate) fn record(&self) -> &ThreadRecord<P> {
        &self.inner
    }
}

impl<P: Port> Clone for JoinHandle<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}
