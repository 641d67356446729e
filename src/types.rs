//! Common Linux types not provided by libc.

use crate::sys;
use bitflags::bitflags;
use std::os::unix::io::RawFd;

/// A file descriptor that has not been registered with io_uring.
#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct Fd(pub RawFd);

/// A file descriptor that has been registered with io_uring using fixed-buffer
/// registration. Reduces per-submission overhead compared to [`Fd`].
#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct Fixed(pub u32);

bitflags! {
    /// Options for [`Timeout`](super::opcode::Timeout) / [`LinkTimeout`](super::opcode::LinkTimeout).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TimeoutFlags: u32 {
        const ABS = sys::IORING_TIMEOUT_ABS;
        const UPDATE = sys::IORING_TIMEOUT_UPDATE;
    }
}

/// A relative or absolute timeout value, used by [`Timeout`](super::opcode::Timeout) and
/// [`LinkTimeout`](super::opcode::LinkTimeout).
#[derive(Default, Debug, Clone, Copy)]
#[repr(transparent)]
pub struct Timespec(sys::__kernel_timespec);

impl Timespec {
    #[inline]
    pub const fn new() -> Self {
        Timespec(sys::__kernel_timespec {
            tv_sec: 0,
            tv_nsec: 0,
        })
    }

    #[inline]
    pub const fn sec(mut self, sec: u64) -> Self {
        self.0.tv_sec = sec as _;
        self
    }

    #[inline]
    pub const fn nsec(mut self, nsec: u32) -> Self {
        self.0.tv_nsec = nsec as _;
        self
    }

    pub(crate) fn as_ptr(&self) -> *const sys::__kernel_timespec {
        &self.0
    }
}

/// A single entry in a [provided-buffer ring](crate::buf_ring::BufRing).
#[repr(transparent)]
pub struct BufRingEntry(pub(crate) sys::io_uring_buf);

impl BufRingEntry {
    pub fn new(addr: u64, len: u32, bid: u16) -> Self {
        BufRingEntry(sys::io_uring_buf {
            addr,
            len,
            bid,
            resv: 0,
        })
    }

    /// Sets the entry addr.
    pub fn set_addr(&mut self, addr: u64) {
        self.0.addr = addr;
    }
    /// Returns the entry addr.
    pub fn addr(&self) -> u64 {
        self.0.addr
    }
    /// Sets the entry len.
    pub fn set_len(&mut self, len: u32) {
        self.0.len = len;
    }
    /// Returns the entry len.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u32 {
        self.0.len
    }
    /// Sets the entry bid.
    pub fn set_bid(&mut self, bid: u16) {
        self.0.bid = bid;
    }
    /// Returns the entry bid.
    pub fn bid(&self) -> u16 {
        self.0.bid
    }

    /// The offset to the ring's tail field given the ring's base address.
    ///
    /// # Safety
    ///
    /// `ring_base` must point to the first entry of an initialized buf_ring, and that
    /// entry (the kernel overlays the tail counter onto the last entry's `resv` field)
    /// must remain live for the duration of the returned pointer's use.
    pub unsafe fn tail(ring_base: *const BufRingEntry) -> *const u16 {
        &(*ring_base).0.resv
    }
}
