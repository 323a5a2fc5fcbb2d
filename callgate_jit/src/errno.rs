//! Per-thread capture of the native error code.
//!
//! Stubs compiled with error capture call [`save_errno`] right after the
//! native function returns, before anything else on the thread can touch
//! `errno` (or `GetLastError` on Windows). The value is kept in a
//! thread-local and read back with [`last_error`].

use std::cell::Cell;
use std::io;

thread_local! {
    static LAST_ERROR: Cell<i32> = const { Cell::new(0) };
}

/// Record the calling thread's OS error code.
///
/// Called from generated code with no arguments. The stub keeps the stack
/// 16-byte aligned at the call and preserves the native return value across
/// it.
pub extern "C" fn save_errno() {
    let code = io::Error::last_os_error().raw_os_error().unwrap_or(0);
    LAST_ERROR.with(|cell| cell.set(code));
}

/// The error code recorded by the last error-capturing stub on this thread.
pub fn last_error() -> i32 {
    LAST_ERROR.with(Cell::get)
}

/// Overwrite the recorded error code for this thread.
pub fn set_last_error(code: i32) {
    LAST_ERROR.with(|cell| cell.set(code));
}

/// Absolute address of [`save_errno`], as patched into stubs.
pub fn save_errno_address() -> u64 {
    save_errno as extern "C" fn() as usize as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_read() {
        set_last_error(17);
        assert_eq!(last_error(), 17);
        set_last_error(0);
        assert_eq!(last_error(), 0);
    }

    #[test]
    fn test_thread_local() {
        set_last_error(5);
        let other = std::thread::spawn(last_error).join().unwrap();
        assert_eq!(other, 0);
        assert_eq!(last_error(), 5);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_save_reads_os_error() {
        unsafe {
            *libc::__errno_location() = libc::ENOENT;
        }
        save_errno();
        assert_eq!(last_error(), libc::ENOENT);
    }

    #[test]
    fn test_address_is_stable() {
        assert_ne!(save_errno_address(), 0);
        assert_eq!(save_errno_address(), save_errno_address());
    }
}
