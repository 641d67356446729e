//! Submission Queue

use core::fmt::{self, Debug, Display, Formatter};
use core::mem;
use core::sync::atomic;

use crate::sys;
use crate::util::{unsync_load, Mmap};

/// An io_uring instance's submission queue. This is used to send I/O requests to the kernel.
pub struct SubmissionQueue {
    head: *const atomic::AtomicU32,
    tail: *const atomic::AtomicU32,
    ring_mask: u32,
    ring_entries: u32,
    flags: *const atomic::AtomicU32,
    dropped: *const atomic::AtomicU32,

    sqes: *mut sys::io_uring_sqe,
}

unsafe impl Send for SubmissionQueue {}
unsafe impl Sync for SubmissionQueue {}

/// A 64-byte submission queue entry (SQE), representing a request for an I/O operation.
///
/// These are created via the opcode builders in [`opcode`](crate::opcode).
#[repr(transparent)]
pub struct Entry(pub(crate) sys::io_uring_sqe);

bitflags::bitflags! {
    /// Submission flags, set with [`Entry::flags`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Flags: u8 {
        /// When this flag is specified, `fd` is an index into the registered file descriptor set.
        const FIXED_FILE = 1 << sys::IOSQE_FIXED_FILE_BIT;

        /// Force the kernel to drain the existing queue before issuing this request.
        const IO_DRAIN = 1 << sys::IOSQE_IO_DRAIN_BIT;

        /// Links the request with the next request in the submission queue.
        const IO_LINK = 1 << sys::IOSQE_IO_LINK_BIT;

        /// Like `IO_LINK`, but it doesn't sever regardless of the completion result.
        const IO_HARDLINK = 1 << sys::IOSQE_IO_HARDLINK_BIT;

        /// Normally io_uring attempts to issue requests inline if possible. Setting this forces
        /// async execution.
        const ASYNC = 1 << sys::IOSQE_ASYNC_BIT;

        /// Let the kernel select a buffer from a registered buffer group for this request.
        const BUFFER_SELECT = 1 << sys::IOSQE_BUFFER_SELECT_BIT;

        /// Don't post a completion event if the request completes successfully.
        const SKIP_SUCCESS = 1 << sys::IOSQE_CQE_SKIP_SUCCESS_BIT;
    }
}

#[test]
fn test_entry_size() {
    assert_eq!(mem::size_of::<Entry>(), 64);
}

impl SubmissionQueue {
    #[rustfmt::skip]
    pub(crate) unsafe fn new(sq_mmap: &Mmap, sqe_mmap: &Mmap, p: &sys::io_uring_params) -> Self {
        let head         = sq_mmap.offset(p.sq_off.head        ) as *const atomic::AtomicU32;
        let tail         = sq_mmap.offset(p.sq_off.tail        ) as *const atomic::AtomicU32;
        let ring_mask    = sq_mmap.offset(p.sq_off.ring_mask   ).cast::<u32>().read();
        let ring_entries = sq_mmap.offset(p.sq_off.ring_entries).cast::<u32>().read();
        let flags        = sq_mmap.offset(p.sq_off.flags       ) as *const atomic::AtomicU32;
        let dropped      = sq_mmap.offset(p.sq_off.dropped     ) as *const atomic::AtomicU32;
        let array        = sq_mmap.offset(p.sq_off.array       ) as *mut u32;

        let sqes = sqe_mmap.as_mut_ptr() as *mut sys::io_uring_sqe;

        // Keep it simple: the index array is the identity permutation, so
        // `tail & ring_mask` always names the right sqe slot directly.
        for i in 0..ring_entries {
            array.add(i as usize).write_volatile(i);
        }

        Self {
            head,
            tail,
            ring_mask,
            ring_entries,
            flags,
            dropped,
            sqes,
        }
    }

    /// Synchronize this type with the real submission queue.
    ///
    /// This will flush any entries added by [`push`](Self::push) or
    /// [`push_multiple`](Self::push_multiple) and will update the queue's length if the kernel has
    /// consumed some entries in the meantime.
    #[inline]
    pub fn sync(&mut self) {
        // nothing to do; head/tail are read fresh on every call below.
    }

    fn head(&self) -> u32 {
        unsafe { (*self.head).load(atomic::Ordering::Acquire) }
    }

    fn tail(&self) -> u32 {
        unsafe { unsync_load(self.tail) }
    }

    fn set_tail(&mut self, tail: u32) {
        unsafe { (*self.tail).store(tail, atomic::Ordering::Release) }
    }

    /// When [`is_setup_sqpoll`](crate::Parameters::is_setup_sqpoll) is set, whether the kernel
    /// thread has gone to sleep and requires a system call to wake it up.
    #[inline]
    pub fn need_wakeup(&self) -> bool {
        unsafe {
            (*self.flags).load(atomic::Ordering::Acquire) & sys::IORING_SQ_NEED_WAKEUP != 0
        }
    }

    /// The number of invalid submission queue entries that have been encountered in the ring
    /// buffer.
    pub fn dropped(&self) -> u32 {
        unsafe { (*self.dropped).load(atomic::Ordering::Acquire) }
    }

    /// Returns `true` if the completion queue ring is overflown.
    pub fn cq_overflow(&self) -> bool {
        unsafe {
            (*self.flags).load(atomic::Ordering::Acquire) & sys::IORING_SQ_CQ_OVERFLOW != 0
        }
    }

    /// Returns `true` if completions are pending that should be processed.
    pub fn taskrun(&self) -> bool {
        unsafe { (*self.flags).load(atomic::Ordering::Acquire) & sys::IORING_SQ_TASKRUN != 0 }
    }

    /// Get the total number of entries in the submission queue ring buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring_entries as usize
    }

    /// Get the number of submission queue events in the ring buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.tail().wrapping_sub(self.head()) as usize
    }

    /// Returns `true` if the submission queue ring buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the submission queue ring buffer has reached capacity, and no more events
    /// can be added before the kernel consumes some.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Attempts to push an entry into the queue.
    /// If the queue is full, an error is returned.
    ///
    /// # Safety
    ///
    /// Developers must ensure that parameters of the entry (such as buffer) are valid and will
    /// be valid for the entire duration of the operation, otherwise it may cause memory problems.
    #[inline]
    pub unsafe fn push(&mut self, entry: &Entry) -> Result<(), PushError> {
        if self.is_full() {
            return Err(PushError);
        }
        let tail = self.tail();
        *self.sqes.add((tail & self.ring_mask) as usize) = entry.0;
        self.set_tail(tail.wrapping_add(1));
        Ok(())
    }

    /// Attempts to push several entries into the queue.
    /// If the queue does not have space for all of the entries, an error is returned.
    ///
    /// # Safety
    ///
    /// Developers must ensure that parameters of all the entries (such as buffer) are valid and
    /// will be valid for the entire duration of the operation, otherwise it may cause memory
    /// problems.
    #[inline]
    pub unsafe fn push_multiple(&mut self, entries: &[Entry]) -> Result<(), PushError> {
        if self.capacity() - self.len() < entries.len() {
            return Err(PushError);
        }
        for entry in entries {
            self.push(entry).expect("space was checked above");
        }
        Ok(())
    }
}

impl Drop for SubmissionQueue {
    fn drop(&mut self) {
        let tail = self.tail();
        self.set_tail(tail);
    }
}

impl Entry {
    /// Set the submission event's [flags](Flags).
    #[inline]
    pub fn flags(mut self, flags: Flags) -> Entry {
        self.0.flags |= flags.bits();
        self
    }

    /// Set the user data. This is an application-supplied value that will be passed straight
    /// through into the [completion queue entry](crate::cqueue::Entry::user_data).
    #[inline]
    pub fn user_data(mut self, user_data: u64) -> Entry {
        self.0.user_data = user_data;
        self
    }

    /// Set the buffer-select group id this request draws its buffer from. Requires
    /// [`Flags::BUFFER_SELECT`].
    #[inline]
    pub fn buf_group(mut self, group: u16) -> Entry {
        self.0.buf_index = group;
        self
    }
}

impl Clone for Entry {
    fn clone(&self) -> Entry {
        Entry(self.0)
    }
}

impl Debug for Entry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("op_code", &self.0.opcode)
            .field("flags", &self.0.flags)
            .field("user_data", &self.0.user_data)
            .finish()
    }
}

/// An error pushing to the submission queue due to it being full.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct PushError;

impl Display for PushError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("submission queue is full")
    }
}

impl std::error::Error for PushError {}

impl Debug for SubmissionQueue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_list();
        let mut pos = self.head();
        let tail = self.tail();
        while pos != tail {
            let entry = unsafe { &*self.sqes.add((pos & self.ring_mask) as usize) };
            d.entry(&Entry(*entry));
            pos = pos.wrapping_add(1);
        }
        d.finish()
    }
}
