use std::io;
use std::net::TcpListener;
use std::os::unix::io::AsRawFd;

use myra_uring::opcode::Target;
use myra_uring::{opcode, IoUring};
use socket2::{Domain, Socket, Type};

#[test]
fn connect_accept_send_recv_round_trip() -> anyhow::Result<()> {
    let mut ring = IoUring::new(8)?;

    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    let addr = listener.local_addr()?;

    let client = Socket::new(Domain::IPV4, Type::STREAM, None)?;
    client.set_nonblocking(true)?;

    let client_addr = socket2::SockAddr::from(addr);
    match client.connect(&client_addr) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) => return Err(e.into()),
    }

    let (stream, _) = listener.accept()?;
    stream.set_nonblocking(true)?;

    // Drive the connect completion through the ring, then send/recv a single frame
    // over the already-accepted stream.
    let connect_poll = opcode::PollAdd::new(Target::Fd(client.as_raw_fd()), libc::POLLOUT as u32)
        .build()
        .user_data(1);
    unsafe {
        ring.submission().push(&connect_poll)?;
    }
    ring.submit_and_wait(1)?;
    let cqe = ring.completion().into_iter().next().expect("poll completion");
    assert_eq!(cqe.user_data(), 1);

    let payload = b"ping";
    let send_e = opcode::Send::new(Target::Fd(client.as_raw_fd()), payload.as_ptr(), payload.len() as u32)
        .build()
        .user_data(2);
    unsafe {
        ring.submission().push(&send_e)?;
    }
    ring.submit_and_wait(1)?;
    let cqe = ring.completion().into_iter().next().expect("send completion");
    assert_eq!(cqe.user_data(), 2);
    assert_eq!(cqe.result(), payload.len() as i32);

    let mut buf = [0u8; 16];
    let recv_e = opcode::Recv::new(
        Target::Fd(stream.as_raw_fd()),
        buf.as_mut_ptr(),
        buf.len() as u32,
    )
    .build()
    .user_data(3);
    unsafe {
        ring.submission().push(&recv_e)?;
    }
    ring.submit_and_wait(1)?;
    let cqe = ring.completion().into_iter().next().expect("recv completion");
    assert_eq!(cqe.user_data(), 3);
    let n = cqe.result();
    assert!(n >= 0);
    assert_eq!(&buf[..n as usize], payload);

    Ok(())
}
