//! Named OS objects: one shared memory region and auto-reset signals.
//!
//! - Unix: POSIX `shm_open` / `mmap` and named semaphores kept binary.
//! - Windows: paging-file mappings and named auto-reset events.
//!
//! Both backends expose the same two types and a process liveness check. Errors are raw [`std::io::Error`]s;
//! callers attach the object name.

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub(crate) use unix::{process_alive, MappedRegion, NamedEvent};
#[cfg(windows)]
pub(crate) use windows::{process_alive, MappedRegion, NamedEvent};
