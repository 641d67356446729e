mod common;

use myra_transport::{Config, Transport};

/// Brings up a listening `server` and a connecting `client` over loopback
/// and drives both rings far enough that the accept/connect handshake has
/// fully completed on both sides, returning the two connection handles.
///
/// `client.connect` and `server.bind_and_listen` only *queue* their first
/// submissions (per `Driver::push`, a submission queue push, not an
/// `io_uring_enter`); nothing reaches the kernel until a ring is pumped. So
/// the client is pumped once, non-blocking, purely to flush the `Connect`
/// SQE onto the wire before the server's blocking `accept` has anything to
/// wait for.
fn connect_pair(client: &mut Transport, server: &mut Transport, addr: std::net::SocketAddr) -> (u32, u32) {
    let client_conn = client.connect(addr).expect("connect");
    client.pump(0).expect("flush connect SQE");

    let server_conn = server.accept().expect("accept");
    client.pump(1).expect("observe connect completion");

    (client_conn, server_conn)
}

#[test]
fn fixed_buffer_ping_pong_round_trip() {
    let addr = common::free_addr();

    let server_cfg = Config::builder().fixed_buffers(8, 4096).build();
    let mut server = Transport::new(server_cfg).expect("server transport");
    server.bind_and_listen(addr, 128).expect("bind_and_listen");

    let client_cfg = Config::builder().fixed_buffers(8, 4096).build();
    let mut client = Transport::new(client_cfg).expect("client transport");

    let (client_conn, server_conn) = connect_pair(&mut client, &mut server, addr);

    client.send(client_conn, b"ping").expect("send ping");
    client.pump(0).expect("flush send SQE");

    let mut dest = [0u8; 64];
    let n = server.receive(server_conn, &mut dest).expect("receive ping");
    assert_eq!(&dest[..n], b"ping");

    server.send(server_conn, b"pong").expect("send pong");
    server.pump(0).expect("flush send SQE");

    let mut dest = [0u8; 64];
    let n = client.receive(client_conn, &mut dest).expect("receive pong");
    assert_eq!(&dest[..n], b"pong");
}

#[test]
fn frame_at_max_frame_boundary_round_trips() {
    let addr = common::free_addr();
    let max_frame = 4096u32;

    let server_cfg = Config::builder()
        .fixed_buffers(4, max_frame)
        .max_frame_bytes(max_frame)
        .build();
    let mut server = Transport::new(server_cfg).expect("server transport");
    server.bind_and_listen(addr, 128).expect("bind_and_listen");

    let client_cfg = Config::builder()
        .fixed_buffers(4, max_frame)
        .max_frame_bytes(max_frame)
        .build();
    let mut client = Transport::new(client_cfg).expect("client transport");

    let (client_conn, server_conn) = connect_pair(&mut client, &mut server, addr);

    let payload = vec![0x5Au8; max_frame as usize];
    client.send(client_conn, &payload).expect("send max-size frame");
    client.pump(0).expect("flush send SQE");

    let mut dest = vec![0u8; max_frame as usize];
    let n = server
        .receive(server_conn, &mut dest)
        .expect("receive max-size frame");
    assert_eq!(n, max_frame as usize);
    assert_eq!(dest, payload);
}

#[test]
fn short_write_is_requeued_and_delivered_whole() {
    // A payload much larger than the socket's send buffer all but
    // guarantees at least one short `Send` completion, exercising
    // `Connection::on_send_completion`'s requeue-the-remainder path end to
    // end rather than only at the unit level.
    let addr = common::free_addr();
    let max_frame = 4 * 1024 * 1024;

    let server_cfg = Config::builder()
        .buffer_ring(7, 32, 8192)
        .max_frame_bytes(max_frame)
        .build();
    let mut server = Transport::new(server_cfg).expect("server transport");
    server.bind_and_listen(addr, 128).expect("bind_and_listen");

    let client_cfg = Config::builder()
        .buffer_ring(7, 32, 8192)
        .max_frame_bytes(max_frame)
        .build();
    let mut client = Transport::new(client_cfg).expect("client transport");

    let (client_conn, server_conn) = connect_pair(&mut client, &mut server, addr);

    let payload = vec![0xABu8; 2 * 1024 * 1024];
    client.send(client_conn, &payload).expect("send large frame");

    // Drive the client until its whole backlog has drained, interleaved
    // with the server draining whatever arrived so neither socket's kernel
    // buffer fills up and deadlocks the other side.
    let mut dest = vec![0u8; payload.len()];
    let mut received = 0usize;
    while received == 0 {
        client.pump(0).expect("client pump");
        match server.try_receive(server_conn, &mut dest).expect("server try_receive") {
            Some(n) => received = n,
            None => {
                server.pump(0).ok();
            }
        }
    }

    assert_eq!(&dest[..received], &payload[..]);
}

#[test]
fn send_on_an_unknown_connection_handle_is_rejected_locally() {
    let cfg = Config::builder().max_frame_bytes(16).build();
    let mut client = Transport::new(cfg).expect("transport");

    // No `connect`/`accept` ever happened, so there is no connection record
    // for handle 0 and nothing ever touches the ring.
    let err = client.send(0, &[0u8; 4]).unwrap_err();
    assert!(matches!(err, myra_transport::TransportError::Fatal { .. }));
}
