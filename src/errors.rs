//! Error types for kernel operations.
//!
//! Locally recoverable failures (bad parameter, already-claimed hardware
//! slot, failed allocation) surface as `Err` values and leave the target
//! object unconstructed. Invariant violations (no current thread where one
//! is required, removing a live thread) terminate execution via `panic!`
//! instead, because continuing would operate on undefined stack or register
//! state.

use core::fmt;

use crate::hal::IrqSource;

/// Result type for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

/// Top-level error type for all kernel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Thread creation or start errors
    Spawn(SpawnError),
    /// Hardware timer errors
    Timer(TimerError),
    /// Interrupt subsystem errors
    Interrupt(InterruptError),
    /// Clock construction errors
    Clock(ClockError),
    /// Staged bring-up errors
    Boot(BootStage),
}

/// Errors that can occur when creating or starting threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// Stack allocation failed
    OutOfMemory,
    /// Task declared an unusable stack size
    InvalidStackSize(usize),
    /// Thread has already left the New state
    AlreadyStarted,
    /// Thread is not registered with the scheduler
    UnknownThread,
}

/// Errors surfaced by the hardware timer contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// Timer cannot raise an interrupt, so it cannot drive dispatch
    NoInterruptSource,
    /// Computed tick period does not fit the counter
    PeriodOutOfRange,
}

/// Errors surfaced by the interrupt subsystem contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptError {
    /// The interrupt subsystem has not completed initialization
    NotInitialized,
    /// The requested interrupt source is already claimed
    SourceClaimed(IrqSource),
}

/// Errors detected while constructing the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    /// Timer reported a zero input frequency
    ZeroFrequency,
    /// Counter width is zero or wider than 64 bits
    BadWidth(u32),
}

/// Bring-up stage that failed; completed stages are rolled back in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStage {
    /// Interrupt subsystem initialization
    Interrupts,
    /// Scheduler construction (including the idle thread)
    Scheduler,
    /// System clock and periodic timer programming
    SystemClock,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::Spawn(e) => write!(f, "spawn error: {}", e),
            KernelError::Timer(e) => write!(f, "timer error: {}", e),
            KernelError::Interrupt(e) => write!(f, "interrupt error: {}", e),
            KernelError::Clock(e) => write!(f, "clock error: {}", e),
            KernelError::Boot(stage) => write!(f, "bring-up failed at stage: {}", stage),
        }
    }
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::OutOfMemory => write!(f, "out of memory for thread stack"),
            SpawnError::InvalidStackSize(size) => write!(f, "invalid stack size: {}", size),
            SpawnError::AlreadyStarted => write!(f, "thread has already been started"),
            SpawnError::UnknownThread => write!(f, "thread is not registered"),
        }
    }
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::NoInterruptSource => write!(f, "timer has no interrupt source"),
            TimerError::PeriodOutOfRange => write!(f, "tick period does not fit the counter"),
        }
    }
}

impl fmt::Display for InterruptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptError::NotInitialized => write!(f, "interrupt subsystem not initialized"),
            InterruptError::SourceClaimed(src) => {
                write!(f, "interrupt source {} already claimed", src.0)
            }
        }
    }
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockError::ZeroFrequency => write!(f, "timer frequency is zero"),
            ClockError::BadWidth(bits) => write!(f, "unusable counter width: {} bits", bits),
        }
    }
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootStage::Interrupts => write!(f, "interrupt subsystem"),
            BootStage::Scheduler => write!(f, "scheduler"),
            BootStage::SystemClock => write!(f, "system clock"),
        }
    }
}

impl From<SpawnError> for KernelError {
    fn from(error: SpawnError) -> Self {
        KernelError::Spawn(error)
    }
}

impl From<TimerError> for KernelError {
    fn from(error: TimerError) -> Self {
        KernelError::Timer(error)
    }
}

impl From<InterruptError> for KernelError {
    fn from(error: InterruptError) -> Self {
        KernelError::Interrupt(error)
    }
}

impl From<ClockError> for KernelError {
    fn from(error: ClockError) -> Self {
        KernelError::Clock(error)
    }
}
