//! Backend selection and helpers shared by the backends.
//!
//! Every backend exposes the same surface:
//!
//! - `STACK_ALIGNMENT`: required alignment of a stack allocation, and the
//!   granularity stack sizes are rounded to.
//! - `DEFAULT_STACK_SIZE`: stack size used when the caller requests none.
//! - `CONTEXT_RESERVE`: bytes reserved at the base of the stack span for
//!   out-of-band context storage (zero for backends that save state on the
//!   stack itself).
//! - `WRAPPER_WORDS`: size in machine words of the save-area buffer backing
//!   the synthetic cothread that represents the kernel thread.
//! - `init_stack`: writes the initial frame so that the first switch lands
//!   in the entry shim, and returns the initial saved-context word plus a
//!   token that reclaims the entry record of a never-started cothread.
//! - `reclaim`: consumes such a token, returning the entry record pointer.
//! - `switch`: the context switch itself. `from` and `to` point at the
//!   saved-context words of the outgoing and incoming cothreads; how the
//!   word is interpreted is the backend's business.

// The assembly helper macros go unused when a portable backend is forced in
// over the native one.
#![allow(unused_macros)]

use std::mem;

// Helper macros to deal with platform-specific differences in assembly code
// between ELF, Mach-O and COFF file formats.
cfg_if::cfg_if! {
    if #[cfg(any(
            target_vendor = "apple",
            all(windows, target_arch = "x86"),
        ))] {
        macro_rules! asm_mangle {
            ($name:literal) => { concat!("_", $name) };
        }
    } else {
        macro_rules! asm_mangle {
            ($name:literal) => { $name };
        }
    }
}
cfg_if::cfg_if! {
    if #[cfg(windows)] {
        // COFF
        macro_rules! asm_function_begin {
            ($name:literal) => {
                concat!(
                    ".globl ", asm_mangle!($name), "\n",
                    ".def ", asm_mangle!($name), "\n",
                    ".scl 2\n",
                    ".type 32\n",
                    ".endef ", asm_mangle!($name), "\n",
                    asm_mangle!($name), ":\n",
                )
            };
        }
        macro_rules! asm_function_end {
            ($name:literal) => {
                ""
            };
        }
    } else if #[cfg(target_vendor = "apple")] {
        // Mach-O
        macro_rules! asm_function_begin {
            ($name:literal) => {
                concat!(
                    ".globl ", asm_mangle!($name), "\n",
                    ".private_extern ", asm_mangle!($name), "\n",
                    asm_mangle!($name), ":\n",
                )
            };
        }
        macro_rules! asm_function_end {
            ($name:literal) => {
                ""
            };
        }
    } else {
        // Everything else uses ELF
        #[cfg(not(target_arch = "arm"))]
        macro_rules! asm_function_type {
            () => { "@function" }
        }
        #[cfg(target_arch = "arm")]
        macro_rules! asm_function_type {
            () => { "%function" }
        }
        macro_rules! asm_function_begin {
            ($name:literal) => {
                concat!(
                    ".globl ", asm_mangle!($name), "\n",
                    ".type ", asm_mangle!($name), ", ", asm_function_type!(), "\n",
                    asm_mangle!($name), ":\n",
                )
            };
        }
        macro_rules! asm_function_end {
            ($name:literal) => {
                concat!(".size ", asm_mangle!($name), ", . - ", asm_mangle!($name), "\n")
            };
        }
    }
}

// The ABI of the entry shim that the initial frame eventually lands in. On
// x86-family targets arguments are passed in registers only under an
// explicitly named convention, which the trampolines rely on.
cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        /// Signature of the function invoked with the entry record when a
        /// fresh cothread first runs.
        pub type EntryFunc = unsafe extern "sysv64" fn(record: *mut u8) -> !;
        macro_rules! entry_func_abi {
            (unsafe fn $($tt:tt)*) => {
                unsafe extern "sysv64" fn $($tt)*
            }
        }
    } else if #[cfg(target_arch = "x86")] {
        /// Signature of the function invoked with the entry record when a
        /// fresh cothread first runs.
        pub type EntryFunc = unsafe extern "fastcall" fn(record: *mut u8) -> !;
        macro_rules! entry_func_abi {
            (unsafe fn $($tt:tt)*) => {
                unsafe extern "fastcall" fn $($tt)*
            }
        }
    } else {
        /// Signature of the function invoked with the entry record when a
        /// fresh cothread first runs.
        pub type EntryFunc = unsafe extern "C" fn(record: *mut u8) -> !;
        macro_rules! entry_func_abi {
            (unsafe fn $($tt:tt)*) => {
                unsafe extern "C" fn $($tt)*
            }
        }
    }
}
pub(crate) use entry_func_abi;

#[cfg(all(feature = "sjlj", feature = "ucontext"))]
compile_error!("at most one of the `sjlj` and `ucontext` features may be enabled");

cfg_if::cfg_if! {
    if #[cfg(all(feature = "sjlj", unix))] {
        mod sjlj;
        pub use self::sjlj::*;
    } else if #[cfg(all(feature = "ucontext", unix))] {
        mod ucontext;
        pub use self::ucontext::*;
    } else if #[cfg(all(target_arch = "x86_64", not(windows)))] {
        mod x86_64;
        pub use self::x86_64::*;
    } else if #[cfg(all(target_arch = "x86_64", windows))] {
        mod x86_64_windows;
        pub use self::x86_64_windows::*;
    } else if #[cfg(target_arch = "x86")] {
        mod x86;
        pub use self::x86::*;
    } else if #[cfg(all(target_arch = "aarch64", not(windows)))] {
        mod aarch64;
        pub use self::aarch64::*;
    } else if #[cfg(all(target_arch = "arm", not(any(windows, target_vendor = "apple"))))] {
        mod arm;
        pub use self::arm::*;
    } else if #[cfg(unix)] {
        // No assembly backend for this target; fall back to sigsetjmp.
        mod sjlj;
        pub use self::sjlj::*;
    } else {
        compile_error!("Unsupported target");
    }
}

/// Helper function to push a value onto a downward-growing stack.
#[inline]
#[allow(dead_code)]
unsafe fn push(sp: &mut usize, val: usize) {
    *sp -= mem::size_of::<usize>();
    *(*sp as *mut usize) = val;
}
