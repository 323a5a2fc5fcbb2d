//! Page-granular memory for generated stubs.
//!
//! Pages start out read+write as [`WritablePages`]. [`WritablePages::seal`]
//! consumes them and hands back read+execute [`ExecutablePages`]; there is
//! no way back to writable.
//!
//! # Safety
//! All raw memory handling of the crate is confined to this file. Callers
//! see a `&mut [u8]` before sealing, and a `&[u8]` plus `as_fn_at` after.

use std::io;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;
use std::sync::atomic::{fence, Ordering};

// =============================================================================
// OS page primitives
// =============================================================================

#[cfg(unix)]
mod os {
    use std::io;
    use std::ptr::{self, NonNull};

    const FALLBACK_PAGE_SIZE: usize = 4096;

    pub fn page_size() -> usize {
        // SAFETY: sysconf has no preconditions.
        match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
            n if n > 0 => n as usize,
            _ => FALLBACK_PAGE_SIZE,
        }
    }

    pub fn map_writable(len: usize) -> io::Result<NonNull<u8>> {
        let prot = libc::PROT_READ | libc::PROT_WRITE;
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        // SAFETY: anonymous private mapping at a kernel-chosen address.
        let addr = unsafe { libc::mmap(ptr::null_mut(), len, prot, flags, -1, 0) };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        NonNull::new(addr.cast()).ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))
    }

    /// # Safety
    /// `base..base + len` must be a mapping returned by [`map_writable`].
    pub unsafe fn protect_read_exec(base: NonNull<u8>, len: usize) -> io::Result<()> {
        let prot = libc::PROT_READ | libc::PROT_EXEC;
        match unsafe { libc::mprotect(base.as_ptr().cast(), len, prot) } {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }

    /// # Safety
    /// `base..base + len` must be a live mapping that nothing refers to.
    pub unsafe fn unmap(base: NonNull<u8>, len: usize) -> io::Result<()> {
        match unsafe { libc::munmap(base.as_ptr().cast(), len) } {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }
}

#[cfg(windows)]
mod os {
    use std::io;
    use std::ptr::{self, NonNull};

    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, VirtualProtect, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE,
        PAGE_EXECUTE_READ, PAGE_READWRITE,
    };
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

    pub fn page_size() -> usize {
        // SAFETY: GetSystemInfo fills the zeroed struct.
        let info = unsafe {
            let mut info: SYSTEM_INFO = std::mem::zeroed();
            GetSystemInfo(&mut info);
            info
        };
        info.dwPageSize as usize
    }

    pub fn map_writable(len: usize) -> io::Result<NonNull<u8>> {
        // SAFETY: fresh reservation at a system-chosen address.
        let addr =
            unsafe { VirtualAlloc(ptr::null(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };
        NonNull::new(addr.cast()).ok_or_else(io::Error::last_os_error)
    }

    /// # Safety
    /// `base..base + len` must be a mapping returned by [`map_writable`].
    pub unsafe fn protect_read_exec(base: NonNull<u8>, len: usize) -> io::Result<()> {
        let mut previous = 0;
        let ok = unsafe { VirtualProtect(base.as_ptr().cast(), len, PAGE_EXECUTE_READ, &mut previous) };
        if ok != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// # Safety
    /// `base` must be a live mapping that nothing refers to.
    pub unsafe fn unmap(base: NonNull<u8>, _len: usize) -> io::Result<()> {
        if unsafe { VirtualFree(base.as_ptr().cast(), 0, MEM_RELEASE) } != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

/// Native page size of the running process.
pub fn page_size() -> usize {
    os::page_size()
}

/// Round `size` up to a whole number of `page_size` pages.
#[inline]
pub const fn pages_for(size: usize, page_size: usize) -> usize {
    size.div_ceil(page_size)
}

/// Current protection of a page block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// Read + write; code is being copied in.
    Writable,
    /// Read + execute; contents are frozen.
    Executable,
}

// =============================================================================
// Writable Pages
// =============================================================================

/// Freshly allocated read-write pages.
#[derive(Debug)]
pub struct WritablePages {
    ptr: NonNull<u8>,
    size: usize,
}

impl WritablePages {
    /// Allocate `count` pages of `page_size` bytes.
    ///
    /// Returns `None` when the platform has no memory to give.
    pub fn allocate(count: usize, page_size: usize) -> Option<Self> {
        let size = count.checked_mul(page_size).filter(|&s| s > 0)?;
        match os::map_writable(size) {
            Ok(ptr) => Some(WritablePages { ptr, size }),
            Err(err) => {
                tracing::debug!(size, error = %err, "page allocation failed");
                None
            }
        }
    }

    /// Base address.
    #[inline]
    pub fn base(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Always false; zero-sized blocks cannot be allocated.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn protection(&self) -> Protection {
        Protection::Writable
    }

    /// The whole block as a mutable byte slice.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the mapping is `size` bytes, read-write, and exclusively
        // owned by `self`.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }

    /// Make the block executable.
    ///
    /// The transition is irreversible. A release fence follows the
    /// protection change, so a thread that acquires an address published
    /// after this call observes the finished code. On failure the pages are
    /// freed.
    pub fn seal(self) -> io::Result<ExecutablePages> {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` owns the mapping and is not dropped.
        if let Err(err) = unsafe { os::protect_read_exec(this.ptr, this.size) } {
            // SAFETY: no slice into the block survives `self` being consumed.
            let _ = unsafe { os::unmap(this.ptr, this.size) };
            return Err(err);
        }
        fence(Ordering::Release);
        Ok(ExecutablePages {
            ptr: this.ptr,
            size: this.size,
        })
    }
}

impl Drop for WritablePages {
    fn drop(&mut self) {
        // SAFETY: exclusively owned; borrows of the slice end before drop.
        if let Err(err) = unsafe { os::unmap(self.ptr, self.size) } {
            tracing::warn!(size = self.size, error = %err, "failed to unmap writable pages");
        }
    }
}

// =============================================================================
// Executable Pages
// =============================================================================

/// Read + execute pages holding finished code.
#[derive(Debug)]
pub struct ExecutablePages {
    ptr: NonNull<u8>,
    size: usize,
}

impl ExecutablePages {
    /// Base address.
    #[inline]
    pub fn base(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn protection(&self) -> Protection {
        Protection::Executable
    }

    /// Read-only view of the code.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping stays readable until drop.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    /// Whether `addr` falls inside this block.
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base() && addr < self.base() + self.size
    }

    /// Reinterpret the code at `offset` as the function pointer type `F`.
    ///
    /// # Safety
    /// `F` must be an `extern "C"` function pointer whose signature matches
    /// the code at `offset`, and it must not be called once `self` is gone.
    #[inline]
    pub unsafe fn as_fn_at<F: Copy>(&self, offset: usize) -> F {
        debug_assert!(offset < self.size, "entry {offset:#x} past end of block");
        debug_assert_eq!(size_of::<F>(), size_of::<usize>(), "not a function pointer");
        let entry = self.base() + offset;
        // SAFETY: caller guarantees `F` is a pointer-sized fn type.
        unsafe { std::mem::transmute_copy::<usize, F>(&entry) }
    }
}

impl Drop for ExecutablePages {
    fn drop(&mut self) {
        // SAFETY: the last owner is going away; callers were told not to
        // keep entry points past this point.
        if let Err(err) = unsafe { os::unmap(self.ptr, self.size) } {
            tracing::warn!(
                base = format_args!("{:#x}", self.base()),
                size = self.size,
                error = %err,
                "failed to release executable pages"
            );
        }
    }
}

// The code is immutable once sealed; sharing across threads is read/execute only.
unsafe impl Send for ExecutablePages {}
unsafe impl Sync for ExecutablePages {}

// Exclusively owned; moving it to another thread moves the only handle.
unsafe impl Send for WritablePages {}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_rounding() {
        assert_eq!(pages_for(1, 4096), 1);
        assert_eq!(pages_for(4096, 4096), 1);
        assert_eq!(pages_for(4097, 4096), 2);
        assert_eq!(pages_for(0, 4096), 0);
    }

    #[test]
    fn test_allocate_and_write() {
        let ps = page_size();
        let mut pages = WritablePages::allocate(2, ps).expect("allocate pages");
        assert_eq!(pages.len(), 2 * ps);
        assert_eq!(pages.protection(), Protection::Writable);
        assert_eq!(pages.base() % ps, 0);

        pages.as_mut_slice()[..2].copy_from_slice(&[0x90, 0xC3]);
        let exec = pages.seal().expect("seal pages");
        assert_eq!(exec.protection(), Protection::Executable);
        assert_eq!(&exec.as_slice()[..2], &[0x90, 0xC3]);
        assert!(exec.contains(exec.base()));
        assert!(!exec.contains(exec.base() + exec.len()));
    }

    #[test]
    fn test_zero_pages_rejected() {
        assert!(WritablePages::allocate(0, page_size()).is_none());
    }

    #[test]
    #[cfg(all(target_arch = "x86_64", unix))]
    fn test_execute_sealed_code() {
        let mut pages = WritablePages::allocate(1, page_size()).expect("allocate pages");
        // mov eax, 42; ret
        pages.as_mut_slice()[..6].copy_from_slice(&[0xB8, 0x2A, 0x00, 0x00, 0x00, 0xC3]);
        let exec = pages.seal().expect("seal pages");

        let answer: unsafe extern "C" fn() -> i32 = unsafe { exec.as_fn_at(0) };
        assert_eq!(unsafe { answer() }, 42);
    }
}
