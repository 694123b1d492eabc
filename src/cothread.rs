//! The cothread handle: construction, switching, the per-thread current
//! pointer and the synthetic kernel-thread wrapper.

use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::arch::{self, entry_func_abi};
use crate::handler;
use crate::stack::{self, OwnedStack, StackSpan};
use crate::Error;

thread_local! {
    /// The cothread currently executing on this OS thread. Populated on
    /// first use with the synthetic wrapper; the slot's drop at thread exit
    /// releases the wrapper unless the caller retained a clone.
    static CURRENT: Cell<Option<Cothread>> = const { Cell::new(None) };
}

/// Heap carrier for the entry closure. The closure cannot live in the
/// initial frame itself, so the frame carries a pointer to this record and
/// the first run takes it back with [`Box::from_raw`].
struct EntryRecord {
    entry: Box<dyn FnOnce()>,
}

enum StackStorage {
    /// Allocated by this crate and released when the last handle drops.
    Owned(#[allow(dead_code)] OwnedStack),
    /// Caller-owned memory; never released here.
    Borrowed,
    /// Save-area buffer standing in for the kernel thread's native stack,
    /// which the OS owns.
    Wrapper { _buf: Box<[usize]> },
}

struct Inner {
    /// Backend-defined saved-context word. The switch routine reads and
    /// writes it through raw pointers from exactly one OS thread at a time.
    saved: UnsafeCell<usize>,
    /// Reclaim token for the entry record while the cothread has never
    /// run; zero once the record has been consumed.
    token: AtomicUsize,
    span: StackSpan,
    /// Keeps the backing memory alive for as long as any handle exists.
    _storage: StackStorage,
    label: Mutex<String>,
}

// Handles may be stored and dropped anywhere; the label is behind a mutex,
// the token is atomic, and the saved-context word is only touched by
// switches, which the `switch_to` contract restricts to the cothread's
// owning OS thread.
unsafe impl Send for Inner {}
unsafe impl Sync for Inner {}

impl Drop for Inner {
    fn drop(&mut self) {
        let token = self.token.swap(0, Ordering::Relaxed);
        if token != 0 {
            // Never ran: take the entry record back from the backend.
            unsafe {
                let record = arch::reclaim(token);
                if !record.is_null() {
                    drop(Box::from_raw(record as *mut EntryRecord));
                }
            }
        }
    }
}

/// A cooperative user-space thread.
///
/// A `Cothread` owns a private stack and enough saved machine state to
/// resume execution where it last left off. Handles are cheap to clone and
/// all clones refer to the same cothread; the underlying resources are
/// released when the last handle drops.
///
/// See the crate-level documentation for the execution model.
#[derive(Clone)]
pub struct Cothread {
    inner: Arc<Inner>,
}

impl Cothread {
    /// Creates a cothread with a default-sized stack that will run `entry`
    /// when first switched to.
    ///
    /// The default stack size is backend-dependent: 512 KiB on 64-bit
    /// targets and 256 KiB on 32-bit targets.
    ///
    /// # Errors
    ///
    /// [`Error::AllocFailed`] if the stack cannot be allocated, and
    /// [`Error::SetupFailed`] if a portable backend cannot build the
    /// initial context.
    pub fn new<F>(entry: F) -> Result<Cothread, Error>
    where
        F: FnOnce() + 'static,
    {
        Cothread::with_stack_size(entry, 0)
    }

    /// Creates a cothread with a stack of `stack_bytes` bytes, where zero
    /// means the backend default.
    ///
    /// The size is rounded down to the backend's stack alignment and then
    /// up to a small minimum; backends that store their context out of band
    /// allocate a reserve on top, so [`stack_size`](Cothread::stack_size)
    /// reports at least the requested size. If the entry function returns,
    /// the process-wide return handler is invoked.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidStackSize`] if the size rounds down to zero, plus
    /// the errors of [`Cothread::new`].
    pub fn with_stack_size<F>(entry: F, stack_bytes: usize) -> Result<Cothread, Error>
    where
        F: FnOnce() + 'static,
    {
        let stack = OwnedStack::new(stack_bytes)?;
        let span = stack.span();
        Cothread::build(Box::new(entry), StackStorage::Owned(stack), span)
    }

    /// Creates a cothread on a caller-owned stack buffer.
    ///
    /// The buffer's length in bytes must be a multiple of
    /// [`stack::STACK_ALIGNMENT`] and at least
    /// [`stack::MIN_STACK_SIZE`] plus the backend's context reserve, or
    /// [`Error::InvalidStackSize`] is returned. Nothing of the buffer is
    /// released on destruction; that remains the caller's job.
    ///
    /// # Safety
    ///
    /// `stack` must point to valid, writable memory that outlives the
    /// cothread, and nothing else may read or write it until the cothread
    /// has been destroyed.
    pub unsafe fn with_stack<F>(entry: F, stack: *mut [usize]) -> Result<Cothread, Error>
    where
        F: FnOnce() + 'static,
    {
        let span = stack::borrowed_span(stack as *mut usize, stack.len())?;
        Cothread::build(Box::new(entry), StackStorage::Borrowed, span)
    }

    fn build(
        entry: Box<dyn FnOnce()>,
        storage: StackStorage,
        span: StackSpan,
    ) -> Result<Cothread, Error> {
        let record = Box::into_raw(Box::new(EntryRecord { entry }));
        match unsafe { arch::init_stack(&span, cothread_entry, record as *mut u8) } {
            Ok((saved, token)) => Ok(Cothread {
                inner: Arc::new(Inner {
                    saved: UnsafeCell::new(saved),
                    token: AtomicUsize::new(token),
                    span,
                    _storage: storage,
                    label: Mutex::new(String::new()),
                }),
            }),
            Err(err) => {
                // Leave nothing behind: the record dies here and an owned
                // stack dies with `storage` on return.
                drop(unsafe { Box::from_raw(record) });
                drop(storage);
                Err(err)
            }
        }
    }

    /// Returns the cothread currently executing on the calling OS thread.
    ///
    /// Before any cothread has run on this thread, this lazily creates a
    /// synthetic wrapper whose save area will hold the kernel thread's
    /// state once a real cothread is switched to; the same handle is
    /// returned until a switch happens. The wrapper is parked in a
    /// thread-local slot and released when the OS thread exits; a caller
    /// that clones the handle keeps it alive beyond that.
    pub fn current() -> Cothread {
        CURRENT.with(|current| {
            let handle = match current.take() {
                Some(handle) => handle,
                None => Cothread::wrapper(),
            };
            current.set(Some(handle.clone()));
            handle
        })
    }

    /// Builds the synthetic cothread standing in for this kernel thread.
    /// It owns no real stack, only a buffer big enough for the backend's
    /// context frame.
    fn wrapper() -> Cothread {
        let mut buf = vec![0usize; arch::WRAPPER_WORDS].into_boxed_slice();
        let span = StackSpan::new(
            buf.as_mut_ptr() as usize,
            buf.len() * mem::size_of::<usize>(),
        );
        let saved = unsafe { arch::init_wrapper(&mut buf) };
        Cothread {
            inner: Arc::new(Inner {
                saved: UnsafeCell::new(saved),
                token: AtomicUsize::new(0),
                span,
                _storage: StackStorage::Wrapper { _buf: buf },
                label: Mutex::new(String::new()),
            }),
        }
    }

    /// Transfers control to this cothread.
    ///
    /// The calling cothread's callee-saved register state goes to its save
    /// location, the per-thread current pointer moves to the target, and
    /// execution resumes wherever the target last stopped (or at its entry
    /// function if it never ran). The call returns when some cothread
    /// switches back to the caller.
    ///
    /// All memory writes made before a switch are visible to the resumed
    /// cothread; the switch is a full compiler barrier.
    ///
    /// # Safety
    ///
    /// - `self` must not be the running cothread on any OS thread.
    /// - `self` must have been created on the calling OS thread (the
    ///   synthetic wrapper belongs to the thread that first observed it).
    /// - The target's stack must be intact; in particular the cothread must
    ///   not have been resumed past its entry return.
    ///
    /// None of this is checked at runtime; violations corrupt both stacks.
    pub unsafe fn switch_to(&self) {
        let from = Cothread::current();
        CURRENT.with(|current| current.set(Some(self.clone())));
        arch::switch(from.inner.saved.get(), self.inner.saved.get());
    }

    /// Returns the debug label attached to this cothread. Empty by default.
    pub fn label(&self) -> String {
        self.inner.label.lock().unwrap().clone()
    }

    /// Attaches a debug label to this cothread. The label is only ever
    /// echoed back in diagnostics; the crate does not interpret it.
    pub fn set_label(&self, label: impl Into<String>) {
        *self.inner.label.lock().unwrap() = label.into();
    }

    /// Size of this cothread's stack span in bytes, including any context
    /// reserve the backend keeps inside the span. Advisory; this is not a
    /// way to check for stack overflow.
    pub fn stack_size(&self) -> usize {
        self.inner.span.len()
    }

    /// Lowest address of the stack span, regardless of the direction the
    /// stack grows. The span is `[stack_base, stack_base + stack_size)`.
    pub fn stack_base(&self) -> *const u8 {
        self.inner.span.base() as *const u8
    }

    /// Whether two handles refer to the same cothread.
    pub fn ptr_eq(&self, other: &Cothread) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Installs the process-wide handler invoked when a cothread returns
    /// from its entry function.
    ///
    /// The handler runs on the returned cothread's stack and receives its
    /// handle; it may switch to another cothread. If it returns instead,
    /// the process is aborted: the returned cothread's stack is no longer
    /// in a usable state.
    ///
    /// Writes to the handler are synchronized against each other, but not
    /// against returning cothreads; install it once at startup, before
    /// cothreads run.
    pub fn set_return_handler<H>(handler: H)
    where
        H: Fn(&Cothread) + Send + Sync + 'static,
    {
        handler::set(Arc::new(handler));
    }

    /// Restores the default return handler, which prints a diagnostic
    /// naming the returned cothread and aborts the process.
    pub fn reset_return_handler() {
        handler::reset();
    }
}

impl fmt::Debug for Cothread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self.inner.label.lock().unwrap();
        write!(f, "Cothread({:p}", Arc::as_ptr(&self.inner))?;
        if !label.is_empty() {
            write!(f, ", {:?}", &*label)?;
        }
        f.write_str(")")
    }
}

entry_func_abi! {
    unsafe fn cothread_entry(record: *mut u8) -> ! {
        // Destructuring the box frees the record allocation now; nothing on
        // this stack runs to completion if the return handler switches away.
        let EntryRecord { entry } = *Box::from_raw(record as *mut EntryRecord);
        let current = Cothread::current();
        current.inner.token.store(0, Ordering::Relaxed);

        // A panic must not unwind into the switch frame below us; there is
        // no caller to propagate it to.
        if panic::catch_unwind(AssertUnwindSafe(entry)).is_err() {
            eprintln!("{current:?} panicked in its entry point");
            process::abort();
        }

        handler::invoke(&current);

        // The handler came back; the frames above the trampoline are spent
        // and this cothread cannot continue.
        process::abort();
    }
}
