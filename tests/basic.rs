use myra_uring::{opcode, IoUring};

#[test]
fn nop_round_trips_user_data() -> anyhow::Result<()> {
    let mut ring = IoUring::new(4)?;

    let entry = opcode::Nop::new().build().user_data(0x42);
    unsafe {
        ring.submission().push(&entry).expect("squeue is full");
    }

    ring.submit_and_wait(1)?;

    let cqe = ring.completion().into_iter().next().expect("cqueue is empty");
    assert_eq!(cqe.user_data(), 0x42);
    assert_eq!(cqe.result(), 0);

    Ok(())
}

#[test]
fn submission_queue_reports_full() -> anyhow::Result<()> {
    let mut ring = IoUring::new(4)?;

    for _ in 0..4 {
        unsafe {
            ring.submission()
                .push(&opcode::Nop::new().build())
                .expect("squeue is full");
        }
    }

    let err = unsafe { ring.submission().push(&opcode::Nop::new().build()) };
    assert!(err.is_err());
    assert!(ring.submission().is_full());
    assert_eq!(ring.submission().len(), 4);

    Ok(())
}

#[test]
fn completion_queue_drains_in_order() -> anyhow::Result<()> {
    let mut ring = IoUring::new(8)?;

    for i in 0..4u64 {
        unsafe {
            ring.submission()
                .push(&opcode::Nop::new().build().user_data(i))
                .expect("squeue is full");
        }
    }
    ring.submit_and_wait(4)?;

    let seen: Vec<u64> = ring
        .completion()
        .into_iter()
        .map(|cqe| cqe.user_data())
        .collect();
    assert_eq!(seen, vec![0, 1, 2, 3]);

    Ok(())
}
