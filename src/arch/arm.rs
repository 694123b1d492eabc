//! 32-bit ARM backend for the AAPCS hard-float (armhf) convention.
//!
//! Register reservations on ARM depend on the target flavor (the frame
//! pointer may be R7 or R11, and R9 may be a platform register), so instead
//! of mixing hand saves with clobber lists the switch stores the whole
//! callee-saved set into the save area: R4-R11, SP, the resume address and
//! D8-D15. The saved-context word points at the area, which is reserved at
//! the base (lowest address) of the stack span.
//!
//! ## Save area layout (words)
//!
//! ```text
//! [0..8)    R4-R11      R4 carries the entry record and R5 the entry shim
//! [8]       SP          into a fresh cothread's first run
//! [9]       Resume PC
//! [10..26)  D8-D15
//! ```
//!
//! The trampoline is assembled in ARM state regardless of the target's
//! instruction set; the switch reaches it through BX, which interworks. A
//! resume address produced inside Thumb code gets its interworking bit set
//! explicitly (`is_thumb` comes from the build script).

use std::arch::{asm, global_asm};

use super::EntryFunc;
use crate::stack::StackSpan;
use crate::Error;

pub const STACK_ALIGNMENT: usize = 16;
pub const DEFAULT_STACK_SIZE: usize = 0x4_0000;
pub const CONTEXT_RESERVE: usize = 0x80;
pub const WRAPPER_WORDS: usize = 64;

const FRAME_ALIGNMENT: usize = 8;

// First-run trampoline. The switch restores R4-R11 from the save area
// before branching here, so the entry record and entry shim arrive in R4
// and R5. LR is zeroed so backtraces stop at the root of the cothread.
global_asm!(
    ".arm",
    ".balign 4",
    asm_function_begin!("cothread_init_trampoline"),
    ".cfi_startproc",
    ".cfi_undefined lr",
    "mov r0, r4",
    "mov lr, #0",
    "bx r5",
    ".cfi_endproc",
    asm_function_end!("cothread_init_trampoline"),
);

extern "C" {
    fn cothread_init_trampoline();
}

#[cfg(not(is_thumb))]
macro_rules! adr_resume {
    () => {
        "adr r12, 2f"
    };
}
#[cfg(is_thumb)]
macro_rules! adr_resume {
    () => {
        // Set the interworking bit so the BX in the peer's switch resumes
        // us in Thumb state.
        "adr r12, 2f\norr r12, r12, #1"
    };
}

/// Writes the initial context into the save area at the base of the span.
pub unsafe fn init_stack(
    span: &StackSpan,
    entry_fn: EntryFunc,
    record: *mut u8,
) -> Result<(usize, usize), Error> {
    let area = span.base() as *mut usize;
    for i in 0..10 {
        area.add(i).write(0);
    }
    area.write(record as usize); // R4
    area.add(1).write(entry_fn as usize); // R5
    area.add(8).write(span.end() & !(FRAME_ALIGNMENT - 1)); // SP
    area.add(9).write(cothread_init_trampoline as usize);

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
        adr_resume!(),
        "mov r3, sp",
        "stm r0, {{r4-r11}}",
        "str r3, [r0, #32]",
        "str r12, [r0, #36]",
        "add r3, r0, #40",
        "vstmia r3, {{d8-d15}}",
        "add r3, r1, #40",
        "vldmia r3, {{d8-d15}}",
        "ldm r1, {{r4-r11}}",
        "ldr r3, [r1, #32]",
        "ldr r12, [r1, #36]",
        "mov sp, r3",
        // Lands in cothread_init_trampoline for a fresh target, or at the
        // target's own 2: label if it was suspended here.
        "bx r12",
        "2:",
        in("r0") from_area,
        in("r1") to_area,
        clobber_abi("C"),
    );
}
