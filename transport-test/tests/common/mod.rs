use std::net::{SocketAddr, TcpListener};
use std::time::{Duration, Instant};

use myra_transport::{DriverEvent, Transport};

/// Reserves a loopback port via `std`, then immediately releases it so a
/// `Transport` can bind it instead. There is a race between the two binds in
/// principle; in practice, on the loopback interface in a single test
/// process, nothing else grabs the port in between.
pub fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local_addr");
    drop(listener);
    addr
}

/// Repeatedly pumps `transport` (non-blocking: `min_complete = 0` just
/// submits whatever is queued and drains whatever already completed)
/// until `pred` sees what it is looking for in the accumulated events, or
/// `timeout` elapses.
pub fn pump_until(
    transport: &mut Transport,
    timeout: Duration,
    mut pred: impl FnMut(&DriverEvent) -> bool,
) -> DriverEvent {
    let deadline = Instant::now() + timeout;
    loop {
        for event in transport.pump(0).expect("pump") {
            if pred(&event) {
                return event;
            }
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for expected driver event");
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}
