//! Interface for submitting queued entries to the kernel and registering
//! resources (fixed buffers, provided-buffer rings, opcode probes) with the
//! ring.

use std::os::unix::io::AsRawFd;
use std::{io, mem, ptr};

use crate::register::Probe;
use crate::squeue::SubmissionQueue;
use crate::sys;
use crate::util::{cast_ptr, Fd};

fn resultify(ret: i32) -> io::Result<i32> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

unsafe fn register(
    fd: &Fd,
    opcode: u32,
    arg: *const libc::c_void,
    nr_args: u32,
) -> io::Result<i32> {
    resultify(sys::io_uring_register(fd.as_raw_fd(), opcode, arg, nr_args))
}

/// Interface for submitting submission queue events in an io_uring instance to the kernel for
/// executing and registering buffers with the instance.
///
/// io_uring supports both directly performing I/O on buffers and registering them beforehand.
/// Registering is slow, but it makes performing the actual I/O much faster.
pub struct Submitter<'a> {
    fd: &'a Fd,
    flags: u32,
    sq: &'a SubmissionQueue,
}

impl<'a> Submitter<'a> {
    #[inline]
    pub(crate) const fn new(fd: &'a Fd, flags: u32, sq: &'a SubmissionQueue) -> Submitter<'a> {
        Submitter { fd, flags, sq }
    }

    fn is_setup_iopoll(&self) -> bool {
        self.flags & sys::IORING_SETUP_IOPOLL != 0
    }

    fn is_setup_sqpoll(&self) -> bool {
        self.flags & sys::IORING_SETUP_SQPOLL != 0
    }

    /// Initiate and/or complete asynchronous I/O. This is a low-level wrapper around
    /// `io_uring_enter` - see `man io_uring_enter` for more details.
    ///
    /// You will probably want to use a more high-level API such as
    /// [`submit`](Self::submit) or [`submit_and_wait`](Self::submit_and_wait).
    ///
    /// # Safety
    ///
    /// This provides a raw interface so developer must ensure that parameters are correct.
    pub unsafe fn enter(
        &self,
        to_submit: u32,
        min_complete: u32,
        flag: u32,
        sig: Option<&libc::sigset_t>,
    ) -> io::Result<usize> {
        let (arg, size) = match sig {
            Some(sig) => (cast_ptr(sig).cast(), mem::size_of::<libc::sigset_t>()),
            None => (ptr::null(), 0),
        };
        resultify(sys::io_uring_enter(
            self.fd.as_raw_fd(),
            to_submit,
            min_complete,
            flag,
            arg,
            size,
        ))
        .map(|res| res as usize)
    }

    /// Submit all queued submission queue events to the kernel.
    #[inline]
    pub fn submit(&self) -> io::Result<usize> {
        self.submit_and_wait(0)
    }

    /// Submit all queued submission queue events to the kernel and wait for at least `want`
    /// completion events to complete.
    pub fn submit_and_wait(&self, want: usize) -> io::Result<usize> {
        let len = self.sq.len();
        let mut flags = 0;

        if want > 0 || self.is_setup_iopoll() || self.sq.cq_overflow() {
            flags |= sys::IORING_ENTER_GETEVENTS;
        }

        if self.is_setup_sqpoll() {
            if self.sq.need_wakeup() {
                flags |= sys::IORING_ENTER_SQ_WAKEUP;
            } else if want == 0 {
                // The kernel thread is polling and hasn't fallen asleep, so we don't need to
                // tell it to process events or wake it up.
                return Ok(len);
            }
        }

        unsafe { self.enter(len as _, want as _, flags, None) }
    }

    /// Wait for the submission queue to have free entries.
    pub fn squeue_wait(&self) -> io::Result<usize> {
        unsafe { self.enter(0, 0, sys::IORING_ENTER_SQ_WAIT, None) }
    }

    /// Register in-memory fixed buffers for I/O with the kernel. You can use these buffers with
    /// the [`ReadFixed`](crate::opcode::ReadFixed) and [`WriteFixed`](crate::opcode::WriteFixed)
    /// operations.
    ///
    /// # Safety
    ///
    /// Developers must ensure that the `iov_base` and `iov_len` values are valid and will
    /// be valid until buffers are unregistered or the ring destroyed, otherwise undefined
    /// behaviour may occur.
    pub unsafe fn register_buffers(&self, bufs: &[libc::iovec]) -> io::Result<()> {
        register(
            self.fd,
            sys::IORING_REGISTER_BUFFERS,
            bufs.as_ptr().cast(),
            bufs.len() as _,
        )
        .map(drop)
    }

    /// Unregister all previously registered fixed buffers.
    ///
    /// You do not need to explicitly call this before dropping the [`IoUring`](crate::IoUring),
    /// as it will be cleaned up by the kernel automatically.
    pub fn unregister_buffers(&self) -> io::Result<()> {
        unsafe { register(self.fd, sys::IORING_UNREGISTER_BUFFERS, ptr::null(), 0) }.map(drop)
    }

    /// Register a provided-buffer ring for receive operations using
    /// [`Flags::BUFFER_SELECT`](crate::squeue::Flags::BUFFER_SELECT).
    ///
    /// If the register command is not supported, or `ring_entries` exceeds 32768, an error is
    /// returned.
    ///
    /// # Safety
    ///
    /// Developers must ensure that `ring_addr` and the region it describes (`ring_entries`
    /// [`BufRingEntry`](crate::types::BufRingEntry)s) are valid and remain valid until the group
    /// is unregistered or the ring destroyed.
    pub unsafe fn register_buf_ring(
        &self,
        ring_addr: u64,
        ring_entries: u16,
        bgid: u16,
    ) -> io::Result<()> {
        let arg = sys::io_uring_buf_reg {
            ring_addr,
            ring_entries: ring_entries as _,
            bgid,
            pad: 0,
            resv: [0; 3],
        };
        register(
            self.fd,
            sys::IORING_REGISTER_PBUF_RING,
            cast_ptr::<sys::io_uring_buf_reg>(&arg).cast(),
            1,
        )
        .map(drop)
    }

    /// Unregister a previously registered provided-buffer ring group.
    pub fn unregister_buf_ring(&self, bgid: u16) -> io::Result<()> {
        let arg = sys::io_uring_buf_reg {
            ring_addr: 0,
            ring_entries: 0,
            bgid,
            pad: 0,
            resv: [0; 3],
        };
        unsafe {
            register(
                self.fd,
                sys::IORING_UNREGISTER_PBUF_RING,
                cast_ptr::<sys::io_uring_buf_reg>(&arg).cast(),
                1,
            )
        }
        .map(drop)
    }

    /// Fill in the given [`Probe`] with information about the opcodes supported by io_uring on
    /// the running kernel.
    pub fn register_probe(&self, probe: &mut Probe) -> io::Result<()> {
        unsafe {
            register(
                self.fd,
                sys::IORING_REGISTER_PROBE,
                probe.as_mut_ptr() as *const _,
                256,
            )
        }
        .map(drop)
    }
}
