use core::ptr;
use core::sync::atomic;
use std::convert::TryFrom;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

/// The ring's own file descriptor. Owns the descriptor; closed on drop.
pub struct Fd(pub RawFd);

impl TryFrom<i32> for Fd {
    type Error = ();

    fn try_from(fd: i32) -> Result<Self, Self::Error> {
        if fd >= 0 {
            Ok(Fd(fd))
        } else {
            Err(())
        }
    }
}

impl AsRawFd for Fd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

/// A region of memory mapped using `mmap(2)`.
pub struct Mmap {
    addr: ptr::NonNull<libc::c_void>,
    len: usize,
}

impl Mmap {
    /// Map `len` bytes starting from the offset `offset` in the file descriptor `fd` into memory.
    pub fn new(fd: &Fd, offset: u64, len: usize) -> io::Result<Mmap> {
        unsafe {
            let addr = libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                fd.0,
                offset as libc::off_t,
            );

            if addr == libc::MAP_FAILED {
                return Err(io::Error::last_os_error());
            }

            // mmap never returns null on success.
            let addr = ptr::NonNull::new_unchecked(addr);
            Ok(Mmap { addr, len })
        }
    }

    /// Allocate `len` bytes of anonymous memory, not backed by any file descriptor.
    /// Used for provided-buffer rings, which the kernel reads by address rather than
    /// by registered offset.
    pub fn new_anon(len: usize) -> io::Result<Mmap> {
        unsafe {
            let addr = libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );

            if addr == libc::MAP_FAILED {
                return Err(io::Error::last_os_error());
            }

            let addr = ptr::NonNull::new_unchecked(addr);
            Ok(Mmap { addr, len })
        }
    }

    /// Do not make the stored memory accessible by child processes after a `fork`.
    pub fn dontfork(&self) -> io::Result<()> {
        unsafe {
            if libc::madvise(self.addr.as_ptr(), self.len, libc::MADV_DONTFORK) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    /// Get a pointer to the memory.
    #[inline]
    pub fn as_mut_ptr(&self) -> *mut libc::c_void {
        self.addr.as_ptr()
    }

    /// Get a pointer to the data at the given offset.
    #[inline]
    pub unsafe fn offset(&self, offset: u32) -> *mut libc::c_void {
        self.as_mut_ptr().add(offset as usize)
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.addr.as_ptr(), self.len);
        }
    }
}

#[inline(always)]
pub unsafe fn unsync_load(u: *const atomic::AtomicU32) -> u32 {
    *u.cast::<u32>()
}

#[inline]
pub const fn cast_ptr<T>(n: &T) -> *const T {
    n
}
