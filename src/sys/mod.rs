#![allow(non_camel_case_types, non_upper_case_globals, dead_code, non_snake_case)]
#![allow(clippy::unreadable_literal, clippy::missing_safety_doc)]

use libc::{c_int, c_long, c_uint, c_void};

include!("sys.rs");

/// Raw `io_uring_register(2)` wrapper. There is no libc helper for this
/// syscall, so it goes through `libc::syscall` directly, same as `setup`
/// and `enter` below.
pub unsafe fn io_uring_register(
    fd: c_int,
    opcode: c_uint,
    arg: *const c_void,
    nr_args: c_uint,
) -> c_int {
    libc::syscall(
        libc::SYS_io_uring_register,
        fd as c_long,
        opcode as c_long,
        arg as c_long,
        nr_args as c_long,
    ) as _
}

pub unsafe fn io_uring_setup(entries: c_uint, p: *mut io_uring_params) -> c_int {
    libc::syscall(libc::SYS_io_uring_setup, entries as c_long, p as c_long) as _
}

pub unsafe fn io_uring_enter(
    fd: c_int,
    to_submit: c_uint,
    min_complete: c_uint,
    flags: c_uint,
    arg: *const c_void,
    size: usize,
) -> c_int {
    libc::syscall(
        libc::SYS_io_uring_enter,
        fd as c_long,
        to_submit as c_long,
        min_complete as c_long,
        flags as c_long,
        arg as c_long,
        size as c_long,
    ) as _
}
