use std::mem;
use std::ptr;

use crate::arch;
use crate::stack::{borrowed_span, OwnedStack, MIN_STACK_SIZE, STACK_ALIGNMENT};
use crate::Error;

#[test]
fn default_size() {
    let stack = OwnedStack::new(0).unwrap();
    assert_eq!(
        stack.span().len(),
        arch::DEFAULT_STACK_SIZE + arch::CONTEXT_RESERVE
    );
    assert_eq!(stack.span().base() % STACK_ALIGNMENT, 0);
    assert_eq!(stack.span().end() - stack.span().base(), stack.span().len());
}

#[test]
fn explicit_size_keeps_reserve() {
    let stack = OwnedStack::new(8 * 1024).unwrap();
    assert_eq!(stack.span().len(), 8 * 1024 + arch::CONTEXT_RESERVE);
}

#[test]
fn size_rounds_down_to_alignment() {
    let stack = OwnedStack::new(8 * 1024 + STACK_ALIGNMENT / 2).unwrap();
    assert_eq!(stack.span().len(), 8 * 1024 + arch::CONTEXT_RESERVE);
}

#[test]
fn tiny_size_is_rejected() {
    assert!(matches!(OwnedStack::new(1), Err(Error::InvalidStackSize)));
    assert!(matches!(
        OwnedStack::new(STACK_ALIGNMENT - 1),
        Err(Error::InvalidStackSize)
    ));
}

#[test]
fn small_but_aligned_size_gets_the_minimum() {
    let stack = OwnedStack::new(STACK_ALIGNMENT).unwrap();
    assert_eq!(stack.span().len(), MIN_STACK_SIZE + arch::CONTEXT_RESERVE);
}

#[test]
fn borrowed_span_validation() {
    let mut words = vec![0usize; 64 * 1024 / mem::size_of::<usize>()];

    let span = borrowed_span(words.as_mut_ptr(), words.len()).unwrap();
    assert_eq!(span.base(), words.as_ptr() as usize);
    assert_eq!(span.len(), 64 * 1024);

    // Null, misaligned length, too small.
    assert!(matches!(
        borrowed_span(ptr::null_mut(), words.len()),
        Err(Error::InvalidStackSize)
    ));
    assert!(matches!(
        borrowed_span(words.as_mut_ptr(), words.len() - 1),
        Err(Error::InvalidStackSize)
    ));
    assert!(matches!(
        borrowed_span(words.as_mut_ptr(), 64),
        Err(Error::InvalidStackSize)
    ));
}
