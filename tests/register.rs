use myra_uring::{opcode, IoUring, Probe};

#[test]
fn probe_reports_nop_as_supported() -> anyhow::Result<()> {
    let ring = IoUring::new(4)?;
    let mut probe = Probe::new();

    ring.submitter().register_probe(&mut probe)?;
    assert!(probe.is_supported(0 /* IORING_OP_NOP */));
    let _ = opcode::Nop::new(); // exercise the opcode the probe is checked against

    Ok(())
}

#[test]
fn fixed_buffers_register_and_unregister() -> anyhow::Result<()> {
    let ring = IoUring::new(4)?;

    let mut buf = vec![0u8; 4096];
    let iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };

    unsafe {
        ring.submitter().register_buffers(&[iov])?;
    }
    ring.submitter().unregister_buffers()?;

    Ok(())
}
