use std::io;
use std::ptr;

use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
};

/// Allocates `size` bytes of committed pages. `VirtualAlloc` returns
/// page-aligned memory, which satisfies every backend's alignment.
pub fn alloc(size: usize, align: usize) -> io::Result<*mut u8> {
    debug_assert!(align <= 4096);
    let buf = unsafe { VirtualAlloc(ptr::null(), size, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };
    if buf.is_null() {
        return Err(io::Error::last_os_error());
    }
    Ok(buf as *mut u8)
}

/// Releases memory obtained from [`alloc`].
pub unsafe fn dealloc(ptr: *mut u8) {
    let ret = VirtualFree(ptr as *mut _, 0, MEM_RELEASE);
    debug_assert_ne!(ret, 0);
}
