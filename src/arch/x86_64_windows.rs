//! AMD64 Windows x64 backend.
//!
//! Mirrors the System V backend; refer to `x86_64.rs` for the stack layout
//! and detailed commentary. The differences are in the saved-register set:
//! the Windows x64 ABI additionally treats RDI, RSI and XMM6-XMM15 as
//! callee-saved, so those join the clobber list and the compiler preserves
//! whichever of them hold live values across the switch.
//!
//! The entry shim deliberately uses the System V ABI even on Windows (the
//! `sysv64` calling convention is available everywhere on x86_64), which
//! keeps the trampoline identical to the System V one: no shadow space has
//! to be materialized for the shim call.
//!
//! The fields that `SwitchToFiber` maintains in the Thread Environment Block
//! (stack base and limit) are left alone, matching the behavior of the
//! allocator this backend pairs with: stacks come from ordinary committed
//! memory with no guard page, so nothing consults the TEB bounds.

use std::arch::{asm, global_asm};

use super::{push, EntryFunc};
use crate::stack::StackSpan;
use crate::Error;

pub const STACK_ALIGNMENT: usize = 64;
pub const DEFAULT_STACK_SIZE: usize = 0x8_0000;
pub const CONTEXT_RESERVE: usize = 0;
pub const WRAPPER_WORDS: usize = 64;

const FRAME_ALIGNMENT: usize = 16;

// No unwind metadata is emitted for the trampoline: the null return address
// pushed below stops stack walkers at the root of the cothread, and SEH
// never has to unwind through it because the entry shim cannot return.
global_asm!(
    ".balign 16",
    asm_function_begin!("cothread_init_trampoline"),
    "pop rdi",
    "pop rax",
    "push 0",
    "jmp rax",
    asm_function_end!("cothread_init_trampoline"),
);

extern "C" {
    fn cothread_init_trampoline();
}

/// Writes the initial frame at the top of the stack span.
pub unsafe fn init_stack(
    span: &StackSpan,
    entry_fn: EntryFunc,
    record: *mut u8,
) -> Result<(usize, usize), Error> {
    let mut sp = span.end() & !(FRAME_ALIGNMENT - 1);

    push(&mut sp, entry_fn as usize);
    push(&mut sp, record as usize);
    push(&mut sp, cothread_init_trampoline as usize);
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
        "lea rax, [rip + 2f]",
        "push rax",
        "push rbp",
        "push rbx",
        "mov [rcx], rsp",
        "mov rsp, [rdx]",
        "pop rbx",
        "pop rbp",
        "ret",
        "2:",
        in("rcx") from,
        in("rdx") to,
        lateout("rdi") _, lateout("rsi") _,
        lateout("r12") _, lateout("r13") _, lateout("r14") _, lateout("r15") _,
        lateout("xmm6") _, lateout("xmm7") _, lateout("xmm8") _, lateout("xmm9") _,
        lateout("xmm10") _, lateout("xmm11") _, lateout("xmm12") _, lateout("xmm13") _,
        lateout("xmm14") _, lateout("xmm15") _,
        clobber_abi("win64"),
    );
}
