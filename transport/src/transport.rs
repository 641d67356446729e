//! The public transport API (§6): `bind_and_listen`, `accept`, `connect`,
//! `send`, `receive`, `close`, `shutdown`. A thin wrapper over [`Driver`]
//! that owns socket creation, building listener and connecting sockets with
//! `socket2` before handing the raw fd to the ring.

use std::net::SocketAddr;
use std::os::unix::io::{IntoRawFd, RawFd};

use socket2::{Domain, Protocol as SockProtocol, SockAddr, Socket, Type};

use crate::config::Config;
use crate::driver::{Driver, DriverEvent};
use crate::error::{Result, TransportError};

/// Opaque handle to a connection, stable for its whole lifetime.
pub type ConnectionHandle = u32;

fn io_to_resource(context: &str, e: std::io::Error) -> TransportError {
    TransportError::resource_with_cause(context, e)
}

/// Owns one ring and every connection multiplexed over it. Per §5, a
/// `Transport` belongs to exactly one thread; nothing here is `Send` or
/// `Sync`.
pub struct Transport {
    driver: Driver,
    listener_fd: Option<RawFd>,
}

impl Transport {
    pub fn new(config: Config) -> Result<Transport> {
        Ok(Transport {
            driver: Driver::new(config)?,
            listener_fd: None,
        })
    }

    /// Binds, listens, and arms the ring for incoming connections. Returns
    /// the listening socket's raw descriptor, kept open for the lifetime of
    /// the transport.
    pub fn bind_and_listen(&mut self, addr: SocketAddr, backlog: i32) -> Result<RawFd> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(SockProtocol::TCP))
            .map_err(|e| io_to_resource("create listening socket", e))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| io_to_resource("set SO_REUSEADDR", e))?;
        socket
            .bind(&SockAddr::from(addr))
            .map_err(|e| io_to_resource("bind", e))?;
        socket
            .listen(backlog)
            .map_err(|e| io_to_resource("listen", e))?;

        let fd = socket.into_raw_fd();
        self.driver.listen(fd)?;
        self.listener_fd = Some(fd);
        Ok(fd)
    }

    /// Initiates an outbound connection. The returned handle is usable
    /// immediately for `send`/`receive`/`close`; those calls queue or block
    /// as appropriate until the connect completion arrives.
    pub fn connect(&mut self, addr: SocketAddr) -> Result<ConnectionHandle> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(SockProtocol::TCP))
            .map_err(|e| io_to_resource("create connecting socket", e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| io_to_resource("set O_NONBLOCK", e))?;

        let fd = socket.into_raw_fd();
        let sockaddr = SockAddr::from(addr);
        self.driver
            .connect(fd, sockaddr.as_ptr(), sockaddr.len())
    }

    /// Pumps completions until `accept` yields a connection, a timeout-free
    /// equivalent of calling `pump` in a loop and filtering for
    /// [`DriverEvent::Accepted`]. Callers that want to interleave accepts
    /// with other I/O should drive [`Transport::pump`] directly instead.
    pub fn accept(&mut self) -> Result<ConnectionHandle> {
        if self.listener_fd.is_none() {
            return Err(TransportError::fatal("accept called before bind_and_listen"));
        }
        loop {
            for event in self.driver.pump(1)? {
                if let DriverEvent::Accepted { conn_id } = event {
                    return Ok(conn_id);
                }
            }
        }
    }

    /// Frames and queues `payload`. Returns once the data is queued, not
    /// once it is on the wire — short writes and backlog draining happen
    /// under the hood. Fails fast with [`TransportError::Resource`] if the
    /// send backlog is already over its watermark; use
    /// [`Transport::send_blocking`] for the suspend-until-drained variant.
    pub fn send(&mut self, conn: ConnectionHandle, payload: &[u8]) -> Result<()> {
        self.driver.send(conn, payload)
    }

    /// Like [`Transport::send`], but instead of failing fast when the
    /// backlog is over its watermark, pumps completions until it has
    /// drained enough room and then queues `payload`. §4.4 exposes this as
    /// a configuration choice between the two APIs, not a policy baked into
    /// the driver.
    pub fn send_blocking(&mut self, conn: ConnectionHandle, payload: &[u8]) -> Result<()> {
        loop {
            match self.driver.send(conn, payload) {
                Ok(()) => return Ok(()),
                Err(TransportError::Resource { .. }) => {
                    self.driver.pump(1)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Pumps completions until a full frame is available for `conn`, then
    /// copies it into `dest`. Fails with [`TransportError::Framing`] if
    /// `dest` is smaller than the frame.
    pub fn receive(&mut self, conn: ConnectionHandle, dest: &mut [u8]) -> Result<usize> {
        loop {
            if let Some(n) = self.try_receive(conn, dest)? {
                return Ok(n);
            }
            for event in self.driver.pump(1)? {
                if let DriverEvent::ReceiveCanceled { conn_id } = event {
                    if conn_id == conn {
                        return Err(TransportError::canceled("receive canceled"));
                    }
                }
            }
        }
    }

    /// Non-blocking counterpart to [`Transport::receive`]: returns the oldest
    /// buffered frame for `conn` without pumping, for callers that drive
    /// [`Transport::pump`] themselves and react to
    /// [`DriverEvent::FrameReady`]. Re-arms the connection's recv first if a
    /// prior cancellation left nothing in flight.
    pub fn try_receive(&mut self, conn: ConnectionHandle, dest: &mut [u8]) -> Result<Option<usize>> {
        self.driver.ensure_recv(conn)?;
        match self.driver.receive(conn)? {
            Some(frame) => {
                if dest.len() < frame.len() {
                    return Err(TransportError::framing("destination too small"));
                }
                dest[..frame.len()].copy_from_slice(&frame);
                Ok(Some(frame.len()))
            }
            None => Ok(None),
        }
    }

    /// Cancels `conn`'s outstanding recv (§4.3: `async_cancel` keyed by the
    /// recv's own token). Best-effort: the recv may complete normally if the
    /// kernel had already finished it. A subsequent `receive`/`try_receive`
    /// call re-arms a fresh recv automatically.
    pub fn cancel_receive(&mut self, conn: ConnectionHandle) -> Result<()> {
        self.driver.cancel_recv(conn)
    }

    /// Requests that `conn` close. The connection record is retained
    /// internally until its close completion arrives; call [`Transport::pump`]
    /// to drive that to completion.
    pub fn close(&mut self, conn: ConnectionHandle) -> Result<()> {
        self.driver.close(conn)
    }

    /// Submits everything queued and waits for at least `min_complete`
    /// completions, returning whatever driver-level events resulted.
    pub fn pump(&mut self, min_complete: usize) -> Result<Vec<DriverEvent>> {
        self.driver.pump(min_complete)
    }

    /// Tears down the ring. Per §4.3's "drain before close" ordering: the
    /// caller should have closed every connection and observed zero
    /// outstanding tokens first; this does not wait for that itself.
    pub fn shutdown(&mut self) {
        if self.driver.outstanding() > 0 {
            tracing::warn!(
                outstanding = self.driver.outstanding(),
                "shutting down with outstanding tokens"
            );
        }
        self.driver.shutdown();
    }
}
