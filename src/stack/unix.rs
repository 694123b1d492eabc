use std::io;
use std::os::raw::c_void;
use std::ptr;

/// Allocates `size` bytes aligned to `align` with `posix_memalign`.
pub fn alloc(size: usize, align: usize) -> io::Result<*mut u8> {
    let mut buf: *mut c_void = ptr::null_mut();
    let err = unsafe { libc::posix_memalign(&mut buf, align, size) };
    if err != 0 {
        return Err(io::Error::from_raw_os_error(err));
    }
    Ok(buf as *mut u8)
}

/// Releases memory obtained from [`alloc`].
pub unsafe fn dealloc(ptr: *mut u8) {
    libc::free(ptr as *mut c_void);
}
