use std::alloc::{self, Layout};
use std::cell::Cell;
use std::mem;
use std::ptr;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::{Cothread, Error};

#[test]
fn create_and_destroy() {
    let cothread = Cothread::new(|| {}).unwrap();
    assert!(!cothread.stack_base().is_null());
    drop(cothread);
}

#[test]
fn default_stack_size() {
    let cothread = Cothread::new(|| {}).unwrap();
    assert!(cothread.stack_size() >= 0x4_0000);
    assert_eq!(cothread.stack_size() % mem::size_of::<usize>(), 0);
}

#[test]
fn switch_and_return() {
    let main = Cothread::current();
    let counter = Rc::new(Cell::new(0));

    let c = counter.clone();
    let m = main.clone();
    let cothread = Cothread::new(move || {
        c.set(c.get() + 1);
        unsafe { m.switch_to() };
    })
    .unwrap();

    assert_eq!(counter.get(), 0);
    unsafe { cothread.switch_to() };
    assert_eq!(counter.get(), 1);
    assert!(Cothread::current().ptr_eq(&main));
}

#[test]
fn repeated_round_trips() {
    let main = Cothread::current();
    let counter = Rc::new(Cell::new(0usize));

    let c = counter.clone();
    let m = main.clone();
    let cothread = Cothread::new(move || loop {
        c.set(c.get() + 1);
        unsafe { m.switch_to() };
    })
    .unwrap();

    for round in 1..=100 {
        // Locals here double as a check that caller state survives the
        // switch.
        let before = counter.get();
        unsafe { cothread.switch_to() };
        assert_eq!(counter.get(), before + 1);
        assert_eq!(counter.get(), round);
    }
}

#[test]
fn current_is_stable_until_a_switch() {
    let first = Cothread::current();
    let second = Cothread::current();
    assert!(first.ptr_eq(&second));
}

#[test]
fn current_inside_the_cothread_is_the_cothread() {
    let main = Cothread::current();
    let observed: Rc<Cell<Option<Cothread>>> = Rc::new(Cell::new(None));

    let o = observed.clone();
    let m = main.clone();
    let cothread = Cothread::new(move || {
        o.set(Some(Cothread::current()));
        unsafe { m.switch_to() };
    })
    .unwrap();

    unsafe { cothread.switch_to() };
    let seen = observed.take().unwrap();
    assert!(seen.ptr_eq(&cothread));
    assert!(!seen.ptr_eq(&main));
}

#[test]
fn return_handler_runs_once_with_the_returned_handle() {
    let main = Cothread::current();
    let entry_ran = Arc::new(AtomicBool::new(false));
    let observed: Arc<Mutex<Vec<Cothread>>> = Arc::new(Mutex::new(Vec::new()));

    let o = observed.clone();
    let m = main.clone();
    Cothread::set_return_handler(move |returned| {
        o.lock().unwrap().push(returned.clone());
        unsafe { m.switch_to() };
    });

    let e = entry_ran.clone();
    let cothread = Cothread::new(move || {
        e.store(true, Ordering::SeqCst);
    })
    .unwrap();

    unsafe { cothread.switch_to() };

    assert!(entry_ran.load(Ordering::SeqCst));
    let observed = observed.lock().unwrap();
    assert_eq!(observed.len(), 1);
    assert!(observed[0].ptr_eq(&cothread));
    Cothread::reset_return_handler();
}

#[test]
fn borrowed_stack() {
    const STACK_BYTES: usize = 128 * 1024;
    let layout = Layout::from_size_align(STACK_BYTES, 64).unwrap();
    let buf = unsafe { alloc::alloc_zeroed(layout) } as *mut usize;
    assert!(!buf.is_null());
    let stack = ptr::slice_from_raw_parts_mut(buf, STACK_BYTES / mem::size_of::<usize>());

    let main = Cothread::current();
    let entered = Rc::new(Cell::new(false));

    let e = entered.clone();
    let m = main.clone();
    let cothread = unsafe {
        Cothread::with_stack(
            move || {
                e.set(true);
                unsafe { m.switch_to() };
            },
            stack,
        )
    }
    .unwrap();

    assert_eq!(cothread.stack_size(), STACK_BYTES);
    assert_eq!(cothread.stack_base() as usize, buf as usize);

    unsafe { cothread.switch_to() };
    assert!(entered.get());

    // The buffer is caller-owned: destroying the cothread must not free
    // it, so freeing it here must not double-free.
    drop(cothread);
    unsafe { alloc::dealloc(buf as *mut u8, layout) };
}

#[test]
fn invalid_stack_sizes() {
    assert!(matches!(
        Cothread::with_stack_size(|| {}, 1),
        Err(Error::InvalidStackSize)
    ));

    // A misaligned borrowed length.
    let mut words = vec![0usize; 8 * 1024 + 1];
    let stack = ptr::slice_from_raw_parts_mut(words.as_mut_ptr(), words.len());
    assert!(matches!(
        unsafe { Cothread::with_stack(|| {}, stack) },
        Err(Error::InvalidStackSize)
    ));
}

#[test]
fn destroying_a_fresh_cothread_releases_its_entry() {
    let payload = Rc::new(());

    let p = payload.clone();
    let cothread = Cothread::new(move || {
        let _keep = p;
    })
    .unwrap();

    assert_eq!(Rc::strong_count(&payload), 2);
    drop(cothread);
    assert_eq!(Rc::strong_count(&payload), 1);
}

#[test]
fn labels() {
    let cothread = Cothread::new(|| {}).unwrap();
    assert_eq!(cothread.label(), "");
    cothread.set_label("worker");
    assert_eq!(cothread.label(), "worker");
    assert!(format!("{cothread:?}").contains("worker"));
}

#[test]
fn families_on_separate_threads_are_independent() {
    let workers: Vec<_> = (0..4)
        .map(|_| {
            thread::spawn(|| {
                let main = Cothread::current();
                let counter = Rc::new(Cell::new(0usize));

                let c = counter.clone();
                let m = main.clone();
                let cothread = Cothread::new(move || loop {
                    c.set(c.get() + 1);
                    unsafe { m.switch_to() };
                })
                .unwrap();

                for _ in 0..10 {
                    unsafe { cothread.switch_to() };
                }
                counter.get()
            })
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap(), 10);
    }
}

#[test]
fn wrapper_handle_survives_its_thread() {
    let wrapper = thread::spawn(Cothread::current).join().unwrap();
    // The thread-local slot released its clone when the thread exited;
    // this clone keeps the wrapper's save area alive.
    assert!(wrapper.stack_size() > 0);
    assert!(!wrapper.stack_base().is_null());
}
