//! Portable backend built on the System V user-context API
//! (`getcontext`/`makecontext`/`swapcontext`).
//!
//! This is mostly a reference backend to validate the assembly ones
//! against: every switch is a libc call that saves and restores the signal
//! mask on some platforms, so it is far slower than a native switch. The
//! API has been removed from POSIX since 2008 and requires a libc that
//! still ships it (glibc and the BSDs do).
//!
//! `makecontext` can only pass `int`-sized arguments to the context's
//! function, which cannot carry a pointer on 64-bit targets. A process-wide
//! registry maps a monotonically increasing non-zero integer key to the
//! entry record instead; the stub function removes its entry by key on
//! first run. The registry lock is taken only at construction, at first
//! entry and when reclaiming a never-started cothread, never on a switch.
//!
//! The `ucontext_t` itself is stored at the base of the stack span, in the
//! reserved region.

use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::raw::{c_int, c_void};
use std::process;
use std::ptr;
use std::sync::{Mutex, OnceLock};

use super::EntryFunc;
use crate::stack::StackSpan;
use crate::Error;

pub const STACK_ALIGNMENT: usize = 64;
pub const DEFAULT_STACK_SIZE: usize = mem::size_of::<usize>() * 0x1_0000;
pub const CONTEXT_RESERVE: usize =
    (mem::size_of::<libc::ucontext_t>() + STACK_ALIGNMENT - 1) & !(STACK_ALIGNMENT - 1);
pub const WRAPPER_WORDS: usize = 256;

const _: () = assert!(WRAPPER_WORDS * mem::size_of::<usize>() >= mem::size_of::<libc::ucontext_t>());

struct Registry {
    entries: HashMap<c_int, (usize, EntryFunc)>,
    last_key: c_int,
}

static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();

fn registry() -> &'static Mutex<Registry> {
    REGISTRY.get_or_init(|| {
        Mutex::new(Registry {
            entries: HashMap::new(),
            last_key: 0,
        })
    })
}

extern "C" fn entry_stub(key: c_int) {
    let entry = registry().lock().unwrap().entries.remove(&key);
    match entry {
        Some((record, entry_fn)) => unsafe { entry_fn(record as *mut u8) },
        // The key was handed to makecontext by init_stack and consumed
        // nowhere else; a missing entry means the context was resumed after
        // its cothread was destroyed.
        None => process::abort(),
    }
}

/// Builds the initial `ucontext_t` in the reserve at the base of the span.
pub unsafe fn init_stack(
    span: &StackSpan,
    entry_fn: EntryFunc,
    record: *mut u8,
) -> Result<(usize, usize), Error> {
    let uctx = span.base() as *mut libc::ucontext_t;
    ptr::write_bytes(uctx as *mut u8, 0, mem::size_of::<libc::ucontext_t>());

    if libc::getcontext(uctx) != 0 {
        return Err(Error::SetupFailed(io::Error::last_os_error()));
    }
    (*uctx).uc_stack.ss_sp = (span.base() + CONTEXT_RESERVE) as *mut c_void;
    (*uctx).uc_stack.ss_size = span.len() - CONTEXT_RESERVE;
    (*uctx).uc_link = ptr::null_mut();

    let key = {
        let mut reg = registry().lock().unwrap();
        let mut key = reg.last_key;
        loop {
            key = key.wrapping_add(1);
            if key != 0 && !reg.entries.contains_key(&key) {
                break;
            }
        }
        reg.last_key = key;
        reg.entries.insert(key, (record as usize, entry_fn));
        key
    };

    let stub: extern "C" fn(c_int) = entry_stub;
    libc::makecontext(
        uctx,
        mem::transmute::<extern "C" fn(c_int), extern "C" fn()>(stub),
        1,
        key,
    );

    Ok((uctx as usize, key as usize))
}

/// Initial saved-context word for the kernel-thread wrapper: `swapcontext`
/// fills the wrapper buffer on the first outgoing switch.
pub unsafe fn init_wrapper(buf: &mut [usize]) -> usize {
    buf.as_mut_ptr() as usize
}

/// Recovers the entry record of a cothread that never ran, scrubbing its
/// registry entry. Returns null if the key was already consumed.
pub unsafe fn reclaim(token: usize) -> *mut u8 {
    let key = token as c_int;
    match registry().lock().unwrap().entries.remove(&key) {
        Some((record, _)) => record as *mut u8,
        None => ptr::null_mut(),
    }
}

/// Saves the current context through `from` and resumes the one saved in
/// `to`. Returns when something switches back to `from`.
pub unsafe fn switch(from: *mut usize, to: *const usize) {
    let from_ctx = *from as *mut libc::ucontext_t;
    let to_ctx = *to as *const libc::ucontext_t;
    let _ = libc::swapcontext(from_ctx, to_ctx);
}
