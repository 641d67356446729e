//! The ring event loop (§4.3): owns the ring, the token table, and every
//! connection record, and drives completions through to their connection's
//! state machine. Grounded on the `pelikan-io-grow-a-cache` io_uring event
//! loop's `worker_loop`/`submit_*`/`handle_*` shape, generalized from a
//! single-protocol echo server to the three operating modes and the
//! length-prefixed transport this workspace implements.

use std::collections::HashMap;
use std::os::unix::io::RawFd;

use myra_uring::types::Timespec;
use myra_uring::{cqueue, opcode, squeue, IoUring};
use tracing::{debug, error, trace, warn};

use crate::buf_ring::ProvidedBufferRing;
use crate::buffers::BufferRegistry;
use crate::config::{Config, Mode};
use crate::connection::{Action, Connection};
use crate::error::{Result, TransportError};
use crate::token::{OpKind, TokenTable};

/// Sentinel connection id for the listener's own outstanding accept.
const LISTENER_CONN_ID: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    Ready,
    Running,
    Draining,
    Closed,
}

/// An event surfaced to the caller after pumping completions: a frame ready
/// to be read, or a connection that finished closing.
#[derive(Debug)]
pub enum DriverEvent {
    FrameReady { conn_id: u32 },
    ConnectionClosed { conn_id: u32 },
    Accepted { conn_id: u32 },
    Connected { conn_id: u32 },
    /// The connection's outstanding recv was canceled (explicit cancel or a
    /// linked timeout). The connection is left open with nothing armed;
    /// call `ensure_recv`/`Transport::receive` again to rearm it.
    ReceiveCanceled { conn_id: u32 },
}

/// Per-connection receive buffer source (§4.1/§4.2): either a leased index
/// into the fixed-buffer registry, or "the kernel will tell us" via the
/// provided-buffer ring.
enum RecvSource {
    Fixed(u32),
    BufferRing,
}

pub struct Driver {
    ring: IoUring,
    config: Config,
    tokens: TokenTable,
    fixed_buffers: Option<BufferRegistry>,
    buffer_ring: Option<ProvidedBufferRing>,
    connections: HashMap<u32, Connection>,
    recv_sources: HashMap<u32, RecvSource>,
    /// The token of each connection's currently outstanding recv, so an
    /// explicit cancel has something to target.
    recv_tokens: HashMap<u32, u64>,
    /// Backing storage for in-flight `Timeout`/`LinkTimeout` SQEs. A
    /// submission only queues locally (§4.3's batching policy); the kernel
    /// doesn't read the `Timespec` until the next flush, which can happen
    /// arbitrarily later, so it must be kept alive here rather than on the
    /// caller's stack.
    pending_timeouts: HashMap<u64, Box<Timespec>>,
    next_conn_id: u32,
    listener_fd: Option<RawFd>,
    state: DriverState,
}

impl Driver {
    pub fn new(config: Config) -> Result<Driver> {
        let mut builder = myra_uring::Builder::default();
        match config.mode() {
            Mode::Sqpoll => {
                builder.setup_sqpoll(config.sqpoll_idle_ms());
                if let Some(cpu) = config.sqpoll_cpu() {
                    builder.setup_sqpoll_cpu(cpu);
                }
            }
            Mode::Direct | Mode::Token => {}
        }

        let ring = builder
            .build(config.ring_size())
            .map_err(|e| TransportError::fatal(format!("ring setup: {e}")))?;

        // `Parameters` only reports back what the kernel actually granted,
        // not what was requested; sqpoll silently downgrades to a no-op
        // instead of erroring if the caller lacks the privilege or the
        // kernel lacks the feature, so it has to be checked explicitly.
        if config.mode() == Mode::Sqpoll && !ring.params().is_setup_sqpoll() {
            return Err(TransportError::unsupported_feature(
                "IORING_SETUP_SQPOLL (kernel did not grant sqpoll for this ring)",
            ));
        }

        let fixed_buffers = match config.fixed_buffers() {
            Some(fb) => Some(BufferRegistry::register(&ring, fb.count, fb.size)?),
            None => None,
        };

        let buffer_ring = match config.buffer_ring() {
            Some(br) => Some(ProvidedBufferRing::create(
                &ring,
                br.group_id,
                br.count,
                br.size,
            )?),
            None => None,
        };

        debug!(
            ring_size = config.ring_size(),
            mode = ?config.mode(),
            fixed_buffers = fixed_buffers.is_some(),
            buffer_ring = buffer_ring.is_some(),
            "transport driver ready"
        );

        Ok(Driver {
            ring,
            config,
            tokens: TokenTable::new(),
            fixed_buffers,
            buffer_ring,
            connections: HashMap::new(),
            recv_sources: HashMap::new(),
            recv_tokens: HashMap::new(),
            pending_timeouts: HashMap::new(),
            next_conn_id: 0,
            listener_fd: None,
            state: DriverState::Ready,
        })
    }

    pub fn outstanding(&self) -> usize {
        self.tokens.outstanding()
    }

    fn is_running(&self) -> bool {
        self.state == DriverState::Running
    }

    /// Arms the listening socket for accepts. `listener_fd` must already be
    /// bound and listening; the driver never calls `bind`/`listen` itself,
    /// matching the rest of the ring-first design where socket setup stays
    /// a thin wrapper over libc (see `transport.rs`).
    pub fn listen(&mut self, listener_fd: RawFd) -> Result<()> {
        self.listener_fd = Some(listener_fd);
        self.state = DriverState::Running;
        self.submit_accept(listener_fd)
    }

    /// Registers a socket that is mid-`connect` and submits the connect
    /// operation through the ring.
    pub fn connect(
        &mut self,
        fd: RawFd,
        addr: *const libc::sockaddr,
        addrlen: libc::socklen_t,
    ) -> Result<u32> {
        if self.state == DriverState::Ready {
            self.state = DriverState::Running;
        }

        let conn_id = self.next_conn_id;
        self.next_conn_id += 1;

        let conn = Connection::connecting(conn_id, fd, self.config.send_watermark_bytes());
        self.connections.insert(conn_id, conn);

        let token = self.tokens.issue(OpKind::Connect, conn_id);
        let entry = opcode::Connect::new(opcode::Target::Fd(fd), addr, addrlen)
            .build()
            .user_data(token);

        self.push(entry, conn_id, token)?;
        Ok(conn_id)
    }

    /// Queues `payload` for `conn_id`, issuing a send submission immediately
    /// if nothing is already in flight.
    pub fn send(&mut self, conn_id: u32, payload: &[u8]) -> Result<()> {
        let max_frame = self.config.max_frame_bytes();
        let action = self
            .connection_mut(conn_id)?
            .enqueue_send(payload, max_frame)?;
        if action == Action::Send {
            self.submit_send(conn_id)?;
        }
        Ok(())
    }

    /// Pops the oldest frame received on `conn_id`, if any is buffered.
    pub fn receive(&mut self, conn_id: u32) -> Result<Option<Vec<u8>>> {
        Ok(self.connection_mut(conn_id)?.take_frame())
    }

    /// Arms a recv for `conn_id` if one isn't already outstanding. A no-op
    /// once the connection has a recv in flight, which is the case almost
    /// all the time; the only window where it matters is right after a
    /// cancellation, which deliberately does not auto-rearm.
    pub fn ensure_recv(&mut self, conn_id: u32) -> Result<()> {
        let conn = self.connection_mut(conn_id)?;
        if conn.is_closed() || conn.recv_in_flight() {
            return Ok(());
        }
        self.submit_recv(conn_id)
    }

    /// Submits an `async_cancel` targeting `conn_id`'s outstanding recv, if
    /// it has one. Cancellation is best-effort (§4.3): the recv may still
    /// complete successfully if the kernel had already finished it.
    pub fn cancel_recv(&mut self, conn_id: u32) -> Result<()> {
        let target = match self.recv_tokens.get(&conn_id) {
            Some(&token) => token,
            None => return Ok(()),
        };

        let token = self.tokens.issue(OpKind::Cancel, conn_id);
        let entry = opcode::AsyncCancel::new(target).build().user_data(token);
        self.push(entry, conn_id, token)
    }

    /// Arms `conn_id`'s next recv linked to a timeout: if nothing has
    /// arrived within `millis`, the kernel cancels the recv itself (the
    /// driver observes the same `-ECANCELED` completion as an explicit
    /// cancel). Replaces whatever the connection's normal auto-rearmed recv
    /// would have submitted; only valid when no recv is currently in
    /// flight.
    pub fn arm_recv_timeout(&mut self, conn_id: u32, millis: u64) -> Result<()> {
        if self.connection_mut(conn_id)?.recv_in_flight() {
            return Err(TransportError::fatal(
                "arm_recv_timeout called with a recv already in flight",
            ));
        }

        let fd = self.connection_mut(conn_id)?.fd();
        let recv_token = self.tokens.issue(OpKind::Recv, conn_id);

        let recv_entry = if let Some(fb) = self.fixed_buffers.as_mut() {
            let idx = fb.acquire()?;
            self.recv_sources.insert(conn_id, RecvSource::Fixed(idx));
            let buf = fb.buffer_mut(idx);
            opcode::Recv::new(opcode::Target::Fd(fd), buf.as_mut_ptr(), buf.len() as u32)
                .build()
                .user_data(recv_token)
                .flags(squeue::Flags::IO_LINK)
        } else if let Some(br) = self.buffer_ring.as_ref() {
            self.recv_sources.insert(conn_id, RecvSource::BufferRing);
            let len = br.entry_size();
            opcode::Recv::new(opcode::Target::Fd(fd), std::ptr::null_mut(), len)
                .build()
                .flags(squeue::Flags::BUFFER_SELECT | squeue::Flags::IO_LINK)
                .user_data(recv_token)
                .buf_group(br.group_id())
        } else {
            return Err(TransportError::fatal(
                "driver has no fixed buffers or buffer ring registered",
            ));
        };

        self.push(recv_entry, conn_id, recv_token)?;
        self.recv_tokens.insert(conn_id, recv_token);
        self.connection_mut(conn_id)?.mark_recv_in_flight();

        let timeout_token = self.tokens.issue(OpKind::Timeout, conn_id);
        let ts = Box::new(
            Timespec::new()
                .sec(millis / 1000)
                .nsec(((millis % 1000) * 1_000_000) as u32),
        );
        let timeout_entry = opcode::LinkTimeout::new(ts.as_ref() as *const Timespec)
            .build()
            .user_data(timeout_token);
        self.push(timeout_entry, conn_id, timeout_token)?;
        self.pending_timeouts.insert(timeout_token, ts);

        Ok(())
    }

    pub fn close(&mut self, conn_id: u32) -> Result<()> {
        let action = self.connection_mut(conn_id)?.request_close();
        if action == Action::Close {
            self.submit_close(conn_id)?;
        }
        Ok(())
    }

    /// Submits everything queued and waits for at least `min_complete`
    /// completions, then drains and dispatches whatever arrived. Returns the
    /// events the caller should act on (frames ready, connections torn
    /// down).
    pub fn pump(&mut self, min_complete: usize) -> Result<Vec<DriverEvent>> {
        if !self.is_running() {
            return Err(TransportError::fatal("pump called on a driver not running"));
        }

        self.ring
            .submit_and_wait(min_complete)
            .map_err(|e| TransportError::fatal(format!("submit_and_wait: {e}")))?;

        let mut events = Vec::new();
        let cqes: Vec<cqueue::Entry> = self.ring.completion().into_iter().collect();
        trace!(n = cqes.len(), "reaped completions");

        for cqe in cqes {
            if let Some(event) = self.dispatch(&cqe)? {
                events.push(event);
            }
        }

        Ok(events)
    }

    fn dispatch(&mut self, cqe: &cqueue::Entry) -> Result<Option<DriverEvent>> {
        let token = cqe.user_data();
        let result = cqe.result();

        let ctx = match self.tokens.retire(token) {
            Some(ctx) => ctx,
            None => {
                warn!(token, "completion for an unknown or stale token");
                return Ok(None);
            }
        };

        if ctx.conn_id != LISTENER_CONN_ID {
            if let Some(conn) = self.connections.get_mut(&ctx.conn_id) {
                conn.note_retired();
            }
        }

        let event = match ctx.op {
            OpKind::Accept => self.on_accept(result),
            OpKind::Connect => self.on_connect(ctx.conn_id, result),
            OpKind::Recv => self.on_recv(ctx.conn_id, result, cqe.flags()),
            OpKind::Send => self.on_send(ctx.conn_id, result),
            OpKind::Close => self.on_close(ctx.conn_id, result),
            OpKind::Cancel => self.on_cancel(ctx.conn_id, result),
            OpKind::Timeout => self.on_timeout(token, ctx.conn_id, result),
        }?;

        // The close completion and the last outstanding op against a
        // connection (e.g. a recv racing the close, per §5's best-effort
        // cancellation) can retire in either order. Whichever one retires
        // last is the one that actually gets to drop the record, so this
        // check runs after every completion rather than only inside
        // `on_close`.
        if event.is_none() && ctx.conn_id != LISTENER_CONN_ID {
            if let Some(conn) = self.connections.get(&ctx.conn_id) {
                if conn.is_closed() && conn.pending_ops() == 0 {
                    self.connections.remove(&ctx.conn_id);
                    debug!(conn_id = ctx.conn_id, "connection record retired");
                    return Ok(Some(DriverEvent::ConnectionClosed { conn_id: ctx.conn_id }));
                }
            }
        }

        Ok(event)
    }

    fn on_accept(&mut self, result: i32) -> Result<Option<DriverEvent>> {
        let listener_fd = self
            .listener_fd
            .ok_or_else(|| TransportError::fatal("accept completion with no listener armed"))?;

        // Always re-arm: a failed accept shouldn't stop the listener from
        // trying again.
        self.submit_accept(listener_fd)?;

        if result < 0 {
            let err = TransportError::from_completion_result(result, "accept");
            if err.is_retryable() {
                debug!(%err, "accept transient failure, re-armed");
                return Ok(None);
            }
            warn!(%err, "accept failed");
            return Ok(None);
        }

        let client_fd = result;
        let conn_id = self.next_conn_id;
        self.next_conn_id += 1;

        let conn = Connection::open(conn_id, client_fd, self.config.send_watermark_bytes());
        self.connections.insert(conn_id, conn);

        debug!(conn_id, fd = client_fd, "accepted connection");

        self.submit_recv(conn_id)?;
        Ok(Some(DriverEvent::Accepted { conn_id }))
    }

    fn on_connect(&mut self, conn_id: u32, result: i32) -> Result<Option<DriverEvent>> {
        if result < 0 {
            let err = TransportError::from_completion_result(result, "connect");
            warn!(conn_id, %err, "connect failed");
            self.connections.remove(&conn_id);
            return Err(err);
        }

        self.connection_mut(conn_id)?.mark_connected()?;
        self.submit_recv(conn_id)?;
        Ok(Some(DriverEvent::Connected { conn_id }))
    }

    fn on_recv(&mut self, conn_id: u32, result: i32, flags: u32) -> Result<Option<DriverEvent>> {
        self.recv_tokens.remove(&conn_id);

        if result < 0 {
            let err = TransportError::from_completion_result(result, "recv");
            if err.is_canceled() {
                debug!(conn_id, "recv canceled, connection left open");
                self.release_recv_source(conn_id, flags);
                self.connection_mut(conn_id)?.clear_recv_in_flight();
                return Ok(Some(DriverEvent::ReceiveCanceled { conn_id }));
            }
            if err.is_retryable() {
                debug!(conn_id, %err, "recv transient failure, resubmitting");
                self.submit_recv(conn_id)?;
                return Ok(None);
            }
            warn!(conn_id, %err, "recv failed, closing connection");
            self.release_recv_source(conn_id, flags);
            return self.force_close(conn_id);
        }

        let n = result as usize;
        let source = self.recv_sources.remove(&conn_id);
        let max_frame = self.config.max_frame_bytes();

        let chunk = match source {
            Some(RecvSource::Fixed(idx)) => {
                let chunk = {
                    let buf = self
                        .fixed_buffers
                        .as_ref()
                        .ok_or_else(|| TransportError::fatal("recv via fixed buffer, none registered"))?
                        .buffer(idx);
                    buf[..n].to_vec()
                };
                if let Some(fb) = self.fixed_buffers.as_mut() {
                    fb.release(idx);
                }
                chunk
            }
            Some(RecvSource::BufferRing) => self
                .buffer_ring
                .as_mut()
                .ok_or_else(|| TransportError::fatal("recv via buffer ring, none registered"))?
                .consume(flags, n),
            None => {
                return Err(TransportError::fatal(
                    "recv completion with no recorded buffer source",
                ))
            }
        };

        // A framing error is specific to this connection's byte stream, not
        // a driver-level fault; it must not escape and abort the rest of
        // this batch's completions for unrelated connections (§4.5: "any
        // framing error closes the connection", not the driver).
        let action = match self.connection_mut(conn_id)?.on_recv_completion(&chunk, max_frame) {
            Ok(action) => action,
            Err(err) => {
                warn!(conn_id, %err, "framing error, closing connection");
                return self.force_close(conn_id);
            }
        };

        let frame_ready = self
            .connections
            .get(&conn_id)
            .map(|c| !c.is_closed())
            .unwrap_or(false);

        match action {
            Action::Recv => self.submit_recv(conn_id)?,
            Action::Close => self.submit_close(conn_id)?,
            Action::Send => self.submit_send(conn_id)?,
            Action::None => {}
        }

        if frame_ready {
            Ok(Some(DriverEvent::FrameReady { conn_id }))
        } else {
            Ok(None)
        }
    }

    fn on_send(&mut self, conn_id: u32, result: i32) -> Result<Option<DriverEvent>> {
        if result < 0 {
            let err = TransportError::from_completion_result(result, "send");
            if err.is_retryable() {
                debug!(conn_id, %err, "send transient failure, resubmitting");
                self.submit_send(conn_id)?;
                return Ok(None);
            }
            warn!(conn_id, %err, "send failed, closing connection");
            return self.force_close(conn_id);
        }

        let action = self
            .connection_mut(conn_id)?
            .on_send_completion(result as usize);

        match action {
            Action::Send => self.submit_send(conn_id)?,
            Action::Close => self.submit_close(conn_id)?,
            Action::Recv | Action::None => {}
        }
        Ok(None)
    }

    fn on_close(&mut self, conn_id: u32, result: i32) -> Result<Option<DriverEvent>> {
        if result < 0 {
            warn!(
                conn_id,
                err = %TransportError::from_completion_result(result, "close"),
                "close completion reported an error, dropping record anyway"
            );
        }

        if let Some(conn) = self.connections.get_mut(&conn_id) {
            conn.on_close_completion();
        }
        // Final record removal (once no other op is still outstanding) is
        // handled uniformly in `dispatch`.
        Ok(None)
    }

    fn on_cancel(&mut self, conn_id: u32, result: i32) -> Result<Option<DriverEvent>> {
        match result {
            0 => debug!(conn_id, "cancel matched and canceled an in-flight request"),
            r if r == -libc::ENOENT => debug!(conn_id, "cancel found no matching request"),
            r => warn!(conn_id, result = r, "cancel completion reported an unexpected error"),
        }
        Ok(None)
    }

    fn on_timeout(&mut self, token: u64, conn_id: u32, result: i32) -> Result<Option<DriverEvent>> {
        self.pending_timeouts.remove(&token);
        match result {
            r if r == -libc::ETIME => debug!(conn_id, "recv deadline expired, canceling linked recv"),
            r if r == -libc::ECANCELED => trace!(conn_id, "recv completed before its deadline"),
            r => warn!(conn_id, result = r, "timeout completion reported an unexpected error"),
        }
        Ok(None)
    }

    fn force_close(&mut self, conn_id: u32) -> Result<Option<DriverEvent>> {
        let action = self.connection_mut(conn_id)?.request_close();
        if action == Action::Close {
            self.submit_close(conn_id)?;
        }
        Ok(None)
    }

    fn release_recv_source(&mut self, conn_id: u32, flags: u32) {
        match self.recv_sources.remove(&conn_id) {
            Some(RecvSource::Fixed(idx)) => {
                if let Some(fb) = self.fixed_buffers.as_mut() {
                    fb.release(idx);
                }
            }
            Some(RecvSource::BufferRing) => {
                // An error completion usually carries no buffer selection at
                // all; recycle one only if the kernel did hand us one.
                if cqueue::buffer_select(flags).is_some() {
                    if let Some(ring) = self.buffer_ring.as_mut() {
                        ring.consume(flags, 0);
                    }
                }
            }
            None => {}
        }
    }

    fn connection_mut(&mut self, conn_id: u32) -> Result<&mut Connection> {
        self.connections
            .get_mut(&conn_id)
            .ok_or_else(|| TransportError::fatal(format!("unknown connection id {conn_id}")))
    }

    fn submit_accept(&mut self, listener_fd: RawFd) -> Result<()> {
        let token = self.tokens.issue(OpKind::Accept, LISTENER_CONN_ID);
        let entry = opcode::Accept::new(
            opcode::Target::Fd(listener_fd),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
        .build()
        .user_data(token);

        self.push(entry, LISTENER_CONN_ID, token)
    }

    fn submit_recv(&mut self, conn_id: u32) -> Result<()> {
        let fd = self.connection_mut(conn_id)?.fd();
        let token = self.tokens.issue(OpKind::Recv, conn_id);

        let entry = if let Some(fb) = self.fixed_buffers.as_mut() {
            let idx = fb.acquire()?;
            self.recv_sources.insert(conn_id, RecvSource::Fixed(idx));
            let buf = fb.buffer_mut(idx);
            opcode::Recv::new(opcode::Target::Fd(fd), buf.as_mut_ptr(), buf.len() as u32)
                .build()
                .user_data(token)
        } else if let Some(br) = self.buffer_ring.as_ref() {
            self.recv_sources.insert(conn_id, RecvSource::BufferRing);
            let len = br.entry_size();
            opcode::Recv::new(opcode::Target::Fd(fd), std::ptr::null_mut(), len)
                .build()
                .flags(squeue::Flags::BUFFER_SELECT)
                .user_data(token)
                .buf_group(br.group_id())
        } else {
            return Err(TransportError::fatal(
                "driver has no fixed buffers or buffer ring registered",
            ));
        };

        self.push(entry, conn_id, token)?;
        self.recv_tokens.insert(conn_id, token);
        self.connection_mut(conn_id)?.mark_recv_in_flight();
        Ok(())
    }

    fn submit_send(&mut self, conn_id: u32) -> Result<()> {
        let fd = self.connection_mut(conn_id)?.fd();
        let token = self.tokens.issue(OpKind::Send, conn_id);
        let buf = self
            .connection_mut(conn_id)?
            .next_send_buffer()
            .ok_or_else(|| TransportError::fatal("submit_send with an empty backlog"))?;

        let entry = opcode::Send::new(opcode::Target::Fd(fd), buf.as_ptr(), buf.len() as u32)
            .build()
            .user_data(token);

        self.push(entry, conn_id, token)
    }

    fn submit_close(&mut self, conn_id: u32) -> Result<()> {
        let fd = self.connection_mut(conn_id)?.fd();
        let token = self.tokens.issue(OpKind::Close, conn_id);
        let entry = opcode::Close::new(opcode::Target::Fd(fd))
            .build()
            .user_data(token);

        self.push(entry, conn_id, token)
    }

    /// Pushes `entry` onto the submission queue, rolling back the token
    /// (and, for connection-owned ops, the pending-op count) if the queue
    /// is full.
    fn push(&mut self, entry: myra_uring::squeue::Entry, conn_id: u32, token: u64) -> Result<()> {
        let pushed = unsafe { self.ring.submission().push(&entry) };
        match pushed {
            Ok(()) => {
                if conn_id != LISTENER_CONN_ID {
                    if let Some(conn) = self.connections.get_mut(&conn_id) {
                        conn.note_issued();
                    }
                }
                Ok(())
            }
            Err(_) => {
                self.tokens.retire(token);
                error!(conn_id, "submission queue full");
                Err(TransportError::transient("submission queue full"))
            }
        }
    }

    pub fn shutdown(&mut self) {
        self.state = DriverState::Draining;
        if let Some(fd) = self.listener_fd.take() {
            unsafe {
                libc::close(fd);
            }
        }
        self.state = DriverState::Closed;
    }
}
