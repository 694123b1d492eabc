//! Symmetric, cooperative user-space threads with explicit context switching.
//!
//! ## Overview
//!
//! A [`Cothread`] owns a private stack and a register save area. Control is
//! transferred between cothreads with [`Cothread::switch_to`], a synchronous
//! context switch performed entirely in user space: the callee-saved register
//! state of the running cothread is stored, the target's state is loaded, and
//! execution continues on the target's stack. The kernel scheduler is never
//! involved, which makes a switch cost on the order of a function call.
//!
//! Unlike coroutine libraries built around a resume/yield pair, cothreads are
//! *symmetric*: there is no parent/child relationship and no yielded value.
//! Any cothread may transfer control to any other cothread created on the
//! same OS thread, including the synthetic handle representing the OS
//! thread's own native stack (obtained from [`Cothread::current`]).
//!
//! ## Example
//!
//! ```rust
//! use cothread::Cothread;
//!
//! fn main() {
//!     let main = Cothread::current();
//!     let worker = Cothread::new(move || {
//!         println!("[worker] running on a private stack");
//!         unsafe { main.switch_to() };
//!     })
//!     .unwrap();
//!
//!     unsafe { worker.switch_to() };
//!     println!("[main] back on the kernel thread's stack");
//! }
//! ```
//!
//! ## Backends
//!
//! Exactly one backend is compiled in, selected from the build target:
//!
//! | Backend           | Target                                    |
//! |-------------------|-------------------------------------------|
//! | `x86_64`          | AMD64, System V ABI (Linux, BSD, macOS)   |
//! | `x86_64_windows`  | AMD64, Windows x64 ABI                    |
//! | `x86`             | i686, fastcall (ELF and COFF)             |
//! | `aarch64`         | 64-bit ARM, AAPCS64                       |
//! | `arm`             | 32-bit ARM, AAPCS/armhf                   |
//! | `sjlj`            | any Unix, via `sigsetjmp` + signals       |
//! | `ucontext`        | any Unix, via the System V context API    |
//!
//! The two portable fallbacks can be forced over the native assembly backend
//! with the `sjlj` and `ucontext` cargo features. They exist for targets
//! without an assembly backend and as a reference to validate the assembly
//! backends against; both are considerably slower than the native switch.
//!
//! ## Rules of the road
//!
//! - A cothread may only be switched to from the OS thread it was created
//!   on. Cothread families on different OS threads are fully independent.
//! - Switching to the cothread that is already running is undefined
//!   behavior. There is no runtime check; this is why [`Cothread::switch_to`]
//!   is `unsafe`.
//! - If an entry function returns, the process-wide return handler is
//!   invoked ([`Cothread::set_return_handler`]); by default it prints a
//!   diagnostic and aborts. Design cothreads to switch away instead of
//!   returning.
//! - There is no preemption and no scheduler. A cothread runs until it
//!   explicitly switches away, and a blocking system call blocks every
//!   cothread on that OS thread.

#![warn(missing_docs)]

use std::fmt;
use std::io;

mod arch;
mod cothread;
mod handler;
pub mod stack;

pub use crate::cothread::Cothread;

/// Errors surfaced while constructing a cothread.
///
/// All construction errors are recoverable and leave no resources behind:
/// no stack allocation and no entry record survive a failed constructor.
#[derive(Debug)]
pub enum Error {
    /// The requested stack is unusable: zero after rounding down to the
    /// backend's alignment, not a multiple of that alignment, or too small
    /// to hold the backend's context frame.
    InvalidStackSize,
    /// The aligned stack allocator refused the request.
    AllocFailed(io::Error),
    /// A portable backend failed to set up the initial context, e.g. the
    /// sjlj backend could not install its signal handler or alternate
    /// stack.
    SetupFailed(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidStackSize => f.write_str("stack size is zero, misaligned or too small"),
            Error::AllocFailed(e) => write!(f, "failed to allocate stack: {e}"),
            Error::SetupFailed(e) => write!(f, "failed to set up initial context: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::InvalidStackSize => None,
            Error::AllocFailed(e) | Error::SetupFailed(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests;
