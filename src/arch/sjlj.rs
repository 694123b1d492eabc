//! Portable backend built on `sigsetjmp`/`siglongjmp` and signal delivery.
//!
//! Execution is moved onto a fresh stack without writing a single register
//! by hand, using Engelschall's portable multithreading technique: an
//! alternate signal stack is pointed into the cothread's stack span, a
//! signal is raised, and the handler (running on the alternate stack)
//! captures a jump buffer there. The first `siglongjmp` to that buffer
//! resumes inside the handler frame, which then invokes the entry shim.
//!
//! Signal dispositions and the alternate stack are process-wide resources,
//! so initial-context construction is serialized by a global lock and the
//! state consumed by the handler is published through a global pointer with
//! release ordering; signal delivery provides the acquire side. Switching
//! itself takes no lock.
//!
//! The jump buffer is stored at the base of the stack span; the reserved
//! region is sized generously above every `sigjmp_buf` in circulation.

use std::io;
use std::mem;
use std::os::raw::{c_int, c_void};
use std::ptr;
use std::sync::atomic::{fence, AtomicPtr, Ordering};
use std::sync::Mutex;

use super::EntryFunc;
use crate::stack::StackSpan;
use crate::Error;

pub const STACK_ALIGNMENT: usize = 64;
pub const DEFAULT_STACK_SIZE: usize = mem::size_of::<usize>() * 0x1_0000;
// Larger than any sigjmp_buf in circulation (glibc's largest is under 400
// bytes), independent of the word size.
pub const CONTEXT_RESERVE: usize = 512;
pub const WRAPPER_WORDS: usize = 512;

const _: () = assert!(WRAPPER_WORDS * mem::size_of::<usize>() >= CONTEXT_RESERVE);

extern "C" {
    // glibc only exports the two-argument form under its internal name;
    // everywhere else `sigsetjmp` is a real symbol.
    #[cfg_attr(
        all(target_os = "linux", target_env = "gnu"),
        link_name = "__sigsetjmp"
    )]
    fn sigsetjmp(env: *mut c_void, savemask: c_int) -> c_int;
    fn siglongjmp(env: *mut c_void, val: c_int) -> !;
}

/// Construction state handed to the signal handler. Published through
/// [`PREPARING`] while [`PREPARE_LOCK`] is held.
struct PrepareState {
    jmp_buf: *mut c_void,
    entry_fn: EntryFunc,
    record: *mut u8,
}

static PREPARE_LOCK: Mutex<()> = Mutex::new(());
static PREPARING: AtomicPtr<PrepareState> = AtomicPtr::new(ptr::null_mut());

extern "C" fn prepare_handler(_signal: c_int) {
    unsafe {
        let state = PREPARING.load(Ordering::Acquire);
        // Copied out before the jump buffer is captured: the state lives on
        // the constructing caller's stack and is gone by the time the
        // second return happens. Volatile reads keep the copies out of
        // registers that `siglongjmp` would not restore.
        let jmp_buf = ptr::read_volatile(ptr::addr_of!((*state).jmp_buf));
        let entry_fn = ptr::read_volatile(ptr::addr_of!((*state).entry_fn));
        let record = ptr::read_volatile(ptr::addr_of!((*state).record));
        if sigsetjmp(jmp_buf, 0) != 0 {
            // Second return: the first switch into the cothread lands here,
            // on the cothread's own stack.
            entry_fn(record);
        }
        // First return: fall out of the handler back onto the caller's
        // stack, leaving the captured jump buffer armed.
    }
}

/// Captures the initial jump buffer for the span via the signal dance.
pub unsafe fn init_stack(
    span: &StackSpan,
    entry_fn: EntryFunc,
    record: *mut u8,
) -> Result<(usize, usize), Error> {
    let jmp_buf = span.base() as *mut c_void;
    ptr::write_bytes(jmp_buf as *mut u8, 0, CONTEXT_RESERVE);

    // Held across the whole dance, including the restore guards below:
    // sigaltstack and signal dispositions are per-process, and the handler
    // reads a single shared pointer.
    let _lock = PREPARE_LOCK.lock().unwrap();

    let alt = libc::stack_t {
        ss_sp: (span.base() + CONTEXT_RESERVE) as *mut c_void,
        ss_flags: 0,
        ss_size: span.len() - CONTEXT_RESERVE,
    };
    let mut old_alt: libc::stack_t = mem::zeroed();
    if libc::sigaltstack(&alt, &mut old_alt) != 0 {
        return Err(Error::SetupFailed(io::Error::last_os_error()));
    }
    let _restore_alt = scopeguard::guard(old_alt, |old| unsafe {
        libc::sigaltstack(&old, ptr::null_mut());
    });

    let mut state = PrepareState {
        jmp_buf,
        entry_fn,
        record,
    };
    PREPARING.store(&mut state, Ordering::Release);

    let mut action: libc::sigaction = mem::zeroed();
    action.sa_sigaction = prepare_handler as usize;
    action.sa_flags = libc::SA_ONSTACK;
    libc::sigemptyset(&mut action.sa_mask);
    let mut old_action: libc::sigaction = mem::zeroed();
    if libc::sigaction(libc::SIGUSR1, &action, &mut old_action) != 0 {
        return Err(Error::SetupFailed(io::Error::last_os_error()));
    }
    let _restore_action = scopeguard::guard(old_action, |old| unsafe {
        libc::sigaction(libc::SIGUSR1, &old, ptr::null_mut());
    });

    if libc::raise(libc::SIGUSR1) != 0 {
        return Err(Error::SetupFailed(io::Error::last_os_error()));
    }

    Ok((jmp_buf as usize, record as usize))
}

/// Initial saved-context word for the kernel-thread wrapper: its jump
/// buffer lives in the wrapper buffer and is captured on the first
/// outgoing switch.
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
    let from_buf = *from as *mut c_void;
    let to_buf = *to as *mut c_void;
    if sigsetjmp(from_buf, 0) == 0 {
        fence(Ordering::Release);
        siglongjmp(to_buf, 1);
    }
}
