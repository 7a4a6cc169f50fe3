#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

//! Preemptive threading kernel for bare-metal DSP and microcontroller
//! targets.
//!
//! `nanotick` provides cooperative-and-preemptive multithreading, a
//! process-wide critical section, monotonic nanosecond timekeeping, and
//! counting semaphores on top of a narrow per-processor-family hardware
//! contract (timer, interrupt controller, register context).
//!
//! # Architecture
//!
//! - [`hal`] — the capability traits a port implements; the core never
//!   touches hardware registers directly
//! - [`critical`] — the global-interrupt critical section, the kernel's
//!   sole mutual-exclusion primitive
//! - [`time`] — fixed-point conversion of raw timer ticks into a
//!   monotonic nanosecond clock
//! - [`thread`] / [`sched`] — thread lifecycle and the tick-driven
//!   priority-preemptive round-robin dispatcher
//! - [`sync`] — counting semaphores built on scheduler blocking
//! - [`kernel`] — staged bring-up with reverse rollback, and the
//!   spawn/yield/sleep/join façade
//!
//! # Quick start
//!
//! ```ignore
//! use nanotick::{Kernel, KernelConfig, Task, priority};
//!
//! struct Blink;
//! impl Task for Blink {
//!     fn run(&self) { /* thread work */ }
//!     fn stack_size(&self) -> usize { 4096 }
//! }
//! static BLINK: Blink = Blink;
//!
//! fn boot(interrupts: BoardInterrupts, timer: BoardTimer) {
//!     static KERNEL: spin::Once<Kernel<Board>> = spin::Once::new();
//!     let kernel = KERNEL.call_once(|| {
//!         Kernel::bring_up(interrupts, timer, KernelConfig::default())
//!             .expect("bring-up failed")
//!     });
//!     kernel.spawn(&BLINK, priority::NORM).expect("spawn failed");
//!     unsafe { kernel.attach_dispatch() }.expect("attach failed");
//!     kernel.yield_now(); // hand the CPU to the first thread
//! }
//! ```
//!
//! Scheduling is single-core: strict priority precedence with FIFO
//! round-robin among equals, driven by a fixed-quantum periodic timer
//! interrupt (default 1000 microseconds) plus cooperative `yield`.

// Core modules
pub mod critical;
pub mod errors;
pub mod hal;
pub mod kernel;
pub mod mem;
pub mod sched;
pub mod sync;
pub mod thread;
pub mod time;

#[cfg(test)]
extern crate std;

extern crate alloc;

// Panic handler for bare-metal builds; host builds (tests, std-shim) link
// against the platform's own.
#[cfg(all(not(test), not(feature = "std-shim"), target_os = "none"))]
use core::panic::PanicInfo;

#[cfg(all(not(test), not(feature = "std-shim"), target_os = "none"))]
#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    // Invariant violations terminate the system; spin with interrupts as
    // they are and let the watchdog take it from here.
    loop {
        core::hint::spin_loop();
    }
}

// ============================================================================
// Public API
// ============================================================================

// Kernel façade
pub use kernel::{Kernel, KernelConfig};

// Hardware contracts
pub use hal::{HardwareTimer, InterruptController, IrqSource, Port, RegisterContext};

// Critical section
pub use critical::CriticalSection;

// Scheduling
pub use sched::{priority, Scheduler};

// Threads
pub use thread::{JoinHandle, Task, ThreadId, ThreadState};

// Synchronization
pub use sync::Semaphore;

// Time
pub use time::{Clock, Duration};

// Errors
pub use errors::{KernelError, KernelResult};
