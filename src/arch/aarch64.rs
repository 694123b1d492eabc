//! AArch64 AAPCS64 backend.
//!
//! Unlike the x86-family backends, the saved context does not live on the
//! cothread's stack: a save area is reserved at the base (lowest address) of
//! the stack span and the saved-context word points at it. The area holds
//! the stack pointer, the resume address and the two registers LLVM reserves
//! (X19 and X29); X20-X28 and D8-D15 are declared as clobbers so the
//! compiler preserves exactly the ones that are live across the switch.
//!
//! ## Save area layout
//!
//! ```text
//! +--------------+  <- stack base (lowest address), saved-context word
//! | Saved SP     |
//! +--------------+
//! | Resume PC    |
//! +--------------+
//! | Saved X19    |
//! +--------------+
//! | Saved X29    |
//! +--------------+
//! |   reserved   |
//! ~     ...      ~  <- rest of the context reserve
//! +--------------+
//! |              |  <- program stack grows down towards the reserve
//! ~     ...      ~
//! ```
//!
//! A fresh cothread's area points the resume PC at the init trampoline and
//! its SP two words below the aligned stack end, where `init_stack` has
//! placed the entry shim address and the entry record for the trampoline to
//! consume.

use std::arch::{asm, global_asm};

use super::EntryFunc;
use crate::stack::StackSpan;
use crate::Error;

pub const STACK_ALIGNMENT: usize = 64;
pub const DEFAULT_STACK_SIZE: usize = 0x8_0000;
pub const CONTEXT_RESERVE: usize = 0x100;
pub const WRAPPER_WORDS: usize = 128;

const FRAME_ALIGNMENT: usize = 16;

// First-run trampoline. The switch routine branches here with SP two words
// below the stack end; the load pops both words while keeping SP 16-byte
// aligned, as AAPCS64 requires at all times. LR is zeroed so backtraces
// stop at the root of the cothread.
global_asm!(
    ".balign 4",
    asm_function_begin!("cothread_init_trampoline"),
    ".cfi_startproc",
    ".cfi_undefined lr",
    "ldp x9, x0, [sp], #16",
    "mov lr, xzr",
    "br x9",
    ".cfi_endproc",
    asm_function_end!("cothread_init_trampoline"),
);

extern "C" {
    fn cothread_init_trampoline();
}

/// Writes the initial context into the save area at the base of the span.
pub unsafe fn init_stack(
    span: &StackSpan,
    entry_fn: EntryFunc,
    record: *mut u8,
) -> Result<(usize, usize), Error> {
    let sp = (span.end() & !(FRAME_ALIGNMENT - 1)) - 16;
    *(sp as *mut usize) = entry_fn as usize;
    *((sp + 8) as *mut usize) = record as usize;

    let area = span.base() as *mut usize;
    area.write(sp);
    area.add(1).write(cothread_init_trampoline as usize);
    area.add(2).write(0); // X19
    area.add(3).write(0); // X29

    Ok((area as usize, record as usize))
}

/// Initial saved-context word for the kernel-thread wrapper: its save area
/// is the wrapper buffer itself.
pub unsafe fn init_wrapper(buf: &mut [usize]) -> usize {
    buf.as_mut_ptr() as usize
}

/// Recovers the entry record of a cothread that never ran.
pub unsafe fn reclaim(token: usize) -> *mut u8 {
    token as *mut u8
}

/// Saves the current context through `from` and resumes the one saved in
/// `to`. Returns when something switches back to `from`.
pub unsafe fn switch(from: *mut usize, to: *const usize) {
    let from_area = *from;
    let to_area = *to;
    asm!(
        "adr x9, 2f",
        "mov x10, sp",
        "stp x10, x9, [x0]",
        // X19 and X29 are LLVM-reserved and cannot be named as clobbers.
        "stp x19, x29, [x0, #16]",
        "ldp x10, x9, [x1]",
        "ldp x19, x29, [x1, #16]",
        "mov sp, x10",
        // Lands in cothread_init_trampoline for a fresh target, or at the
        // target's own 2: label if it was suspended here.
        "br x9",
        "2:",
        in("x0") from_area,
        in("x1") to_area,
        lateout("x20") _, lateout("x21") _, lateout("x22") _, lateout("x23") _,
        lateout("x24") _, lateout("x25") _, lateout("x26") _, lateout("x27") _,
        lateout("x28") _,
        lateout("v8") _, lateout("v9") _, lateout("v10") _, lateout("v11") _,
        lateout("v12") _, lateout("v13") _, lateout("v14") _, lateout("v15") _,
        clobber_abi("C"),
    );
}
