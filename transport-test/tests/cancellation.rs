mod common;

use std::time::Duration;

use myra_transport::{Config, DriverEvent, Transport};

fn connect_pair(client: &mut Transport, server: &mut Transport, addr: std::net::SocketAddr) -> (u32, u32) {
    let client_conn = client.connect(addr).expect("connect");
    client.pump(0).expect("flush connect SQE");

    let server_conn = server.accept().expect("accept");
    client.pump(1).expect("observe connect completion");

    (client_conn, server_conn)
}

/// Issue a receive, let it sit idle for a bit, cancel it, and confirm the
/// driver surfaces `ReceiveCanceled` for exactly that connection rather than
/// hanging or tearing it down. Afterward a fresh receive on the same
/// connection must still work: cancellation retires only the canceled
/// recv's own token, not the connection.
#[test]
fn canceled_receive_surfaces_receive_canceled_event() {
    let addr = common::free_addr();

    let server_cfg = Config::builder().fixed_buffers(4, 4096).build();
    let mut server = Transport::new(server_cfg).expect("server transport");
    server.bind_and_listen(addr, 128).expect("bind_and_listen");

    let client_cfg = Config::builder().fixed_buffers(4, 4096).build();
    let mut client = Transport::new(client_cfg).expect("client transport");

    let (client_conn, server_conn) = connect_pair(&mut client, &mut server, addr);

    // Arms the accept-time recv before anything has arrived on the wire.
    server.pump(0).expect("flush accept-armed recv");

    std::thread::sleep(Duration::from_millis(50));

    server.cancel_receive(server_conn).expect("cancel_receive");

    let event = common::pump_until(&mut server, Duration::from_secs(1), |e| {
        matches!(e, DriverEvent::ReceiveCanceled { .. })
    });
    assert!(matches!(event, DriverEvent::ReceiveCanceled { conn_id } if conn_id == server_conn));

    // A fresh receive on the same connection must succeed: the connection
    // was left open and `try_receive` re-arms the recv automatically.
    client.send(client_conn, b"after-cancel").expect("send after-cancel");
    client.pump(0).expect("flush send SQE");

    let mut dest = [0u8; 64];
    let n = server.receive(server_conn, &mut dest).expect("receive after cancel");
    assert_eq!(&dest[..n], b"after-cancel");
}

/// The same scenario driven through `Transport::receive` directly: a
/// blocked receive call must itself return `Canceled` once the cancel's
/// completion is observed, not hang forever.
#[test]
fn blocking_receive_unblocks_with_canceled() {
    let addr = common::free_addr();

    let server_cfg = Config::builder().fixed_buffers(4, 4096).build();
    let mut server = Transport::new(server_cfg).expect("server transport");
    server.bind_and_listen(addr, 128).expect("bind_and_listen");

    let client_cfg = Config::builder().fixed_buffers(4, 4096).build();
    let mut client = Transport::new(client_cfg).expect("client transport");

    let (client_conn, server_conn) = connect_pair(&mut client, &mut server, addr);

    server.pump(0).expect("flush accept-armed recv");

    // `Transport::receive` blocks pumping the server's ring; issue the
    // cancel from a second transport-independent path isn't possible here
    // (single-threaded per connection owner), so the cancel is submitted
    // just before the blocking call observes its own completion by driving
    // one non-blocking pump first to queue it.
    server.cancel_receive(server_conn).expect("cancel_receive");

    let mut dest = [0u8; 64];
    let err = server.receive(server_conn, &mut dest).expect_err("receive should observe the cancellation");
    assert!(err.is_canceled(), "expected Canceled, got {err:?}");

    client.send(client_conn, b"still-works").expect("send still-works");
    client.pump(0).expect("flush send SQE");

    let mut dest = [0u8; 64];
    let n = server.receive(server_conn, &mut dest).expect("receive after cancel");
    assert_eq!(&dest[..n], b"still-works");
}

/// Canceling a connection with no recv outstanding is a documented no-op,
/// not an error: `AsyncCancel` is only submitted when a target token is on
/// record.
#[test]
fn cancel_with_nothing_outstanding_is_a_no_op() {
    let addr = common::free_addr();

    let server_cfg = Config::builder().fixed_buffers(4, 4096).build();
    let mut server = Transport::new(server_cfg).expect("server transport");
    server.bind_and_listen(addr, 128).expect("bind_and_listen");

    let client_cfg = Config::builder().fixed_buffers(4, 4096).build();
    let mut client = Transport::new(client_cfg).expect("client transport");

    let (_client_conn, server_conn) = connect_pair(&mut client, &mut server, addr);

    // The recv armed at accept time is already outstanding by the time this
    // runs; cancel it and wait for the cancellation's own completion so
    // `recv_tokens` drops its entry for this connection, leaving nothing for
    // a second cancel to target.
    server.cancel_receive(server_conn).expect("first cancel");
    common::pump_until(&mut server, Duration::from_secs(1), |e| {
        matches!(e, DriverEvent::ReceiveCanceled { conn_id } if *conn_id == server_conn)
    });

    server
        .cancel_receive(server_conn)
        .expect("canceling with nothing outstanding must not error");
}
