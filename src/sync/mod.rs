//! Synchronization primitives built on scheduler blocking.

pub mod semaphore;

pub use semaphore::Semaphore;
