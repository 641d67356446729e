//! Typed builders for the submission queue entries this crate's callers need.
//!
//! Covers accept/connect/recv/send/close, fixed-buffer read/write, poll,
//! timeout/linked-timeout, and async-cancel; vectored I/O, fsync,
//! sendmsg/recvmsg, poll-remove, and sync_file_range are not needed by
//! anything above this layer and were left out (see `DESIGN.md`).

#![allow(clippy::new_without_default)]

use std::os::unix::io::RawFd;

use crate::squeue::Entry;
use crate::sys;
use crate::types::Timespec;

/// Where a submission's file descriptor comes from: a plain fd, or an index
/// into a registered fixed-file table.
#[derive(Debug, Clone, Copy)]
pub enum Target {
    Fd(RawFd),
    Fixed(u32),
}

macro_rules! assign_fd {
    ( $sqe:ident . fd = $opfd:expr ) => {
        match $opfd {
            Target::Fd(fd) => $sqe.fd = fd,
            Target::Fixed(i) => {
                $sqe.fd = i as _;
                $sqe.flags |= 1 << sys::IOSQE_FIXED_FILE_BIT;
            }
        }
    };
}

macro_rules! opcode {
    (
        $( #[$outer:meta] )*
        pub struct $name:ident {
            $( #[$new_meta:meta] )*
            $( $field:ident : $tname:ty ),* $(,)?
            ;;
            $(
                $( #[$opt_meta:meta] )*
                $opt_field:ident : $opt_tname:ty = $default:expr
            ),* $(,)?
        }
    ) => {
        $( #[$outer] )*
        pub struct $name {
            $( $field : $tname, )*
            $( $opt_field : $opt_tname, )*
        }

        impl $name {
            $( #[$new_meta] )*
            pub const fn new( $( $field : $tname ),* ) -> Self {
                $name {
                    $( $field , )*
                    $( $opt_field: $default, )*
                }
            }

            $(
                $( #[$opt_meta] )*
                pub const fn $opt_field(mut self, $opt_field: $opt_tname) -> Self {
                    self.$opt_field = $opt_field;
                    self
                }
            )*
        }
    }
}

#[inline]
fn sqe_zeroed() -> sys::io_uring_sqe {
    unsafe { std::mem::zeroed() }
}

opcode!(
    /// Do not perform any I/O. Used to exercise the ring itself in tests.
    #[derive(Debug)]
    pub struct Nop { ;; }
);

impl Nop {
    pub fn build(self) -> Entry {
        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_NOP;
        Entry(sqe)
    }
}

opcode!(
    /// Accept a connection on a listening socket, equivalent to `accept4(2)`.
    #[derive(Debug)]
    pub struct Accept {
        fd: Target,
        addr: *mut libc::sockaddr,
        addrlen: *mut libc::socklen_t,
        ;;
        flags: i32 = 0,
    }
);

impl Accept {
    pub fn build(self) -> Entry {
        let Accept {
            fd,
            addr,
            addrlen,
            flags,
        } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_ACCEPT;
        assign_fd!(sqe.fd = fd);
        sqe.addr = addr as _;
        sqe.off = addrlen as _;
        sqe.op_flags = flags as _;
        Entry(sqe)
    }
}

opcode!(
    /// Connect a socket, equivalent to `connect(2)`.
    #[derive(Debug)]
    pub struct Connect {
        fd: Target,
        addr: *const libc::sockaddr,
        addrlen: libc::socklen_t,
        ;;
    }
);

impl Connect {
    pub fn build(self) -> Entry {
        let Connect { fd, addr, addrlen } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_CONNECT;
        assign_fd!(sqe.fd = fd);
        sqe.addr = addr as _;
        sqe.off = addrlen as u64;
        Entry(sqe)
    }
}

opcode!(
    /// Receive from a socket into a plain buffer, equivalent to `recv(2)`.
    #[derive(Debug)]
    pub struct Recv {
        fd: Target,
        buf: *mut u8,
        len: u32,
        ;;
        flags: i32 = 0,
    }
);

impl Recv {
    pub fn build(self) -> Entry {
        let Recv {
            fd,
            buf,
            len,
            flags,
        } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_RECV;
        assign_fd!(sqe.fd = fd);
        sqe.addr = buf as _;
        sqe.len = len;
        sqe.op_flags = flags as _;
        Entry(sqe)
    }
}

opcode!(
    /// Send to a socket from a plain buffer, equivalent to `send(2)`.
    #[derive(Debug)]
    pub struct Send {
        fd: Target,
        buf: *const u8,
        len: u32,
        ;;
        flags: i32 = 0,
    }
);

impl Send {
    pub fn build(self) -> Entry {
        let Send {
            fd,
            buf,
            len,
            flags,
        } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_SEND;
        assign_fd!(sqe.fd = fd);
        sqe.addr = buf as _;
        sqe.len = len;
        sqe.op_flags = flags as _;
        Entry(sqe)
    }
}

opcode!(
    /// Read into a plain buffer, similar to `pread(2)`.
    #[derive(Debug)]
    pub struct Read {
        fd: Target,
        buf: *mut u8,
        len: u32,
        ;;
        offset: i64 = 0,
    }
);

impl Read {
    pub fn build(self) -> Entry {
        let Read {
            fd,
            buf,
            len,
            offset,
        } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_READ;
        assign_fd!(sqe.fd = fd);
        sqe.addr = buf as _;
        sqe.len = len;
        sqe.off = offset as _;
        Entry(sqe)
    }
}

opcode!(
    /// Write from a plain buffer, similar to `pwrite(2)`.
    #[derive(Debug)]
    pub struct Write {
        fd: Target,
        buf: *const u8,
        len: u32,
        ;;
        offset: i64 = 0,
    }
);

impl Write {
    pub fn build(self) -> Entry {
        let Write {
            fd,
            buf,
            len,
            offset,
        } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_WRITE;
        assign_fd!(sqe.fd = fd);
        sqe.addr = buf as _;
        sqe.len = len;
        sqe.off = offset as _;
        Entry(sqe)
    }
}

opcode!(
    /// Read from a previously registered fixed buffer (§4.1).
    #[derive(Debug)]
    pub struct ReadFixed {
        fd: Target,
        buf: *mut u8,
        len: u32,
        buf_index: u16,
        ;;
        offset: i64 = 0,
    }
);

impl ReadFixed {
    pub fn build(self) -> Entry {
        let ReadFixed {
            fd,
            buf,
            len,
            buf_index,
            offset,
        } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_READ_FIXED;
        assign_fd!(sqe.fd = fd);
        sqe.addr = buf as _;
        sqe.len = len;
        sqe.off = offset as _;
        sqe.buf_index = buf_index;
        Entry(sqe)
    }
}

opcode!(
    /// Write to a previously registered fixed buffer (§4.1).
    #[derive(Debug)]
    pub struct WriteFixed {
        fd: Target,
        buf: *const u8,
        len: u32,
        buf_index: u16,
        ;;
        offset: i64 = 0,
    }
);

impl WriteFixed {
    pub fn build(self) -> Entry {
        let WriteFixed {
            fd,
            buf,
            len,
            buf_index,
            offset,
        } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_WRITE_FIXED;
        assign_fd!(sqe.fd = fd);
        sqe.addr = buf as _;
        sqe.len = len;
        sqe.off = offset as _;
        sqe.buf_index = buf_index;
        Entry(sqe)
    }
}

opcode!(
    /// Poll the specified fd for readiness, one-shot.
    #[derive(Debug)]
    pub struct PollAdd {
        fd: Target,
        flags: u32,
        ;;
    }
);

impl PollAdd {
    pub fn build(self) -> Entry {
        let PollAdd { fd, flags } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_POLL_ADD;
        assign_fd!(sqe.fd = fd);
        sqe.op_flags = flags;
        Entry(sqe)
    }
}

opcode!(
    /// Register a standalone timeout; completes with `-ETIME` on expiry, or 0/`-ECANCELED`.
    #[derive(Debug)]
    pub struct Timeout {
        timespec: *const Timespec,
        ;;
        count: u32 = 0,
        flags: u32 = 0,
    }
);

impl Timeout {
    pub fn build(self) -> Entry {
        let Timeout {
            timespec,
            count,
            flags,
        } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_TIMEOUT;
        sqe.addr = timespec as _;
        sqe.len = 1;
        sqe.off = count as u64;
        sqe.op_flags = flags;
        Entry(sqe)
    }
}

opcode!(
    /// Link a timeout to the previous submission in the same chain, cancelling it on expiry.
    /// Must follow an entry carrying [`Flags::IO_LINK`](crate::squeue::Flags::IO_LINK).
    #[derive(Debug)]
    pub struct LinkTimeout {
        timespec: *const Timespec,
        ;;
        flags: u32 = 0,
    }
);

impl LinkTimeout {
    pub fn build(self) -> Entry {
        let LinkTimeout { timespec, flags } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_LINK_TIMEOUT;
        sqe.addr = timespec as _;
        sqe.len = 1;
        sqe.op_flags = flags;
        Entry(sqe)
    }
}

opcode!(
    /// Attempt to cancel a previously submitted request by its token (user_data).
    #[derive(Debug)]
    pub struct AsyncCancel {
        user_data: u64,
        ;;
        flags: u32 = 0,
    }
);

impl AsyncCancel {
    pub fn build(self) -> Entry {
        let AsyncCancel { user_data, flags } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_ASYNC_CANCEL;
        sqe.addr = user_data;
        sqe.op_flags = flags;
        Entry(sqe)
    }
}

opcode!(
    /// Close a file descriptor through the ring, equivalent to `close(2)`.
    #[derive(Debug)]
    pub struct Close {
        fd: Target,
        ;;
    }
);

impl Close {
    pub fn build(self) -> Entry {
        let Close { fd } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_CLOSE;
        match fd {
            Target::Fd(fd) => sqe.fd = fd,
            Target::Fixed(i) => sqe.splice_fd_in = i as i32,
        }
        Entry(sqe)
    }
}

impl From<crate::types::Fd> for Target {
    fn from(fd: crate::types::Fd) -> Target {
        Target::Fd(fd.0)
    }
}

impl From<crate::types::Fixed> for Target {
    fn from(fd: crate::types::Fixed) -> Target {
        Target::Fixed(fd.0)
    }
}
