//! AMD64 System V backend.
//!
//! The saved context of a suspended cothread lives on its own stack and the
//! saved-context word holds the stack pointer it was suspended with. The
//! switch saves the registers the ABI requires a callee to preserve: RBX and
//! RBP are pushed by hand because LLVM reserves them, while R12-R15 are
//! declared as clobbers so the compiler only spills the ones that are live.
//!
//! ## Stack layout
//!
//! A suspended cothread's stack looks like this:
//!
//! ```text
//! |              |
//! ~     ...      ~
//! |              |
//! +--------------+
//! | Resume RIP   |
//! +--------------+
//! | Saved RBP    |
//! +--------------+
//! | Saved RBX    |
//! +--------------+  <- saved-context word
//! ```
//!
//! A freshly initialized cothread carries the same shape, except that the
//! resume address is the init trampoline and the two slots above it hold the
//! entry record and the entry shim for the trampoline to consume:
//!
//! ```text
//! +--------------+  <- stack end, aligned down to 16
//! | Entry shim   |
//! +--------------+
//! | Entry record |
//! +--------------+
//! | Initial RIP  |  <- cothread_init_trampoline
//! +--------------+
//! | RBP (zero)   |
//! +--------------+
//! | RBX (zero)   |
//! +--------------+  <- saved-context word
//! ```

use std::arch::{asm, global_asm};

use super::{push, EntryFunc};
use crate::stack::StackSpan;
use crate::Error;

pub const STACK_ALIGNMENT: usize = 64;
pub const DEFAULT_STACK_SIZE: usize = 0x8_0000;
pub const CONTEXT_RESERVE: usize = 0;
pub const WRAPPER_WORDS: usize = 64;

const FRAME_ALIGNMENT: usize = 16;

// First-run trampoline. The switch routine's final RET lands here with the
// stack pointer two words below the aligned stack end: the entry record and
// the entry shim address are still in place above it. A null return address
// is pushed instead of calling the shim so that backtraces stop at the root
// of the cothread; the shim never returns.
global_asm!(
    ".balign 16",
    asm_function_begin!("cothread_init_trampoline"),
    ".cfi_startproc",
    ".cfi_undefined rip",
    "pop rdi",
    "pop rax",
    "push 0",
    "jmp rax",
    ".cfi_endproc",
    asm_function_end!("cothread_init_trampoline"),
);

extern "C" {
    fn cothread_init_trampoline();
}

/// Writes the initial frame at the top of the stack span.
///
/// Returns the initial saved-context word and the token that reclaims the
/// entry record if the cothread is destroyed before ever running.
pub unsafe fn init_stack(
    span: &StackSpan,
    entry_fn: EntryFunc,
    record: *mut u8,
) -> Result<(usize, usize), Error> {
    let mut sp = span.end() & !(FRAME_ALIGNMENT - 1);

    push(&mut sp, entry_fn as usize);
    push(&mut sp, record as usize);
    push(&mut sp, cothread_init_trampoline as usize);
    // Zeroed slots for the registers the switch routine restores.
    push(&mut sp, 0); // RBP
    push(&mut sp, 0); // RBX

    Ok((sp, record as usize))
}

/// Initial saved-context word for the kernel-thread wrapper.
///
/// The value is never loaded before the first outgoing switch overwrites
/// it, so pointing at the buffer is as good as anything.
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
    asm!(
        // Resume address for whoever switches back to us.
        "lea rax, [rip + 2f]",
        "push rax",
        // RBP and RBX are LLVM-reserved and cannot be named as clobbers, so
        // they are saved by hand.
        "push rbp",
        "push rbx",
        // Publish our stack pointer and adopt the target's.
        "mov [rdi], rsp",
        "mov rsp, [rsi]",
        "pop rbx",
        "pop rbp",
        // Lands in cothread_init_trampoline for a fresh target, or at the
        // target's own 2: label if it was suspended here.
        "ret",
        "2:",
        in("rdi") from,
        in("rsi") to,
        // The remaining callee-saved registers are ordinary clobbers; the
        // compiler spills exactly the ones that are live across the switch.
        lateout("r12") _, lateout("r13") _, lateout("r14") _, lateout("r15") _,
        clobber_abi("sysv64"),
    );
}
