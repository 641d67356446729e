use myra_uring::opcode::Target;
use myra_uring::types::Timespec;
use myra_uring::{opcode, squeue, IoUring};

#[test]
fn standalone_timeout_expires_with_etime() -> anyhow::Result<()> {
    let mut ring = IoUring::new(4)?;

    let ts = Timespec::new().sec(0).nsec(10_000_000);
    let timeout = opcode::Timeout::new(&ts as *const Timespec)
        .build()
        .user_data(0x99);

    unsafe {
        ring.submission().push(&timeout)?;
    }
    ring.submit_and_wait(1)?;

    let cqe = ring.completion().into_iter().next().expect("timeout completion");
    assert_eq!(cqe.user_data(), 0x99);
    assert_eq!(cqe.result(), -libc::ETIME);

    Ok(())
}

#[test]
fn async_cancel_reports_not_found_for_unknown_token() -> anyhow::Result<()> {
    let mut ring = IoUring::new(4)?;

    let cancel = opcode::AsyncCancel::new(0xDEAD_BEEF).build().user_data(1);
    unsafe {
        ring.submission().push(&cancel)?;
    }
    ring.submit_and_wait(1)?;

    let cqe = ring.completion().into_iter().next().expect("cancel completion");
    assert_eq!(cqe.user_data(), 1);
    assert_eq!(cqe.result(), -libc::ENOENT);

    Ok(())
}

#[test]
fn linked_timeout_cancels_a_pending_request() -> anyhow::Result<()> {
    let mut ring = IoUring::new(4)?;

    let ts = Timespec::new().sec(0).nsec(10_000_000);

    // A fd of -1 never becomes readable, so the linked timeout is what resolves this chain.
    let poll_entry = opcode::PollAdd::new(Target::Fd(-1), libc::POLLIN as u32)
        .build()
        .user_data(10)
        .flags(squeue::Flags::IO_LINK);
    let link_timeout = opcode::LinkTimeout::new(&ts as *const Timespec)
        .build()
        .user_data(11);

    unsafe {
        ring.submission().push(&poll_entry)?;
        ring.submission().push(&link_timeout)?;
    }
    ring.submit_and_wait(2)?;

    let results: Vec<(u64, i32)> = ring
        .completion()
        .into_iter()
        .map(|cqe| (cqe.user_data(), cqe.result()))
        .collect();
    assert_eq!(results.len(), 2);

    Ok(())
}
