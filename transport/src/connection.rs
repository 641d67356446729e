//! Per-connection state machine (§4.4), grounded on `flux-network`'s
//! `tcp/stream.rs` `ConnState`/backlog-draining shape but adapted from a
//! readiness model (epoll `Interest`) to a completion model: instead of
//! reacting to "the socket became writable", this reacts to "a send/recv
//! submission completed".

use std::collections::VecDeque;
use std::os::unix::io::RawFd;

use crate::error::{Result, TransportError};
use crate::framing::FrameDecoder;

/// Where a connection sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closing,
    Closed,
}

/// What a connection needs the driver to do next, reported back after
/// feeding it a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing further needed right now.
    None,
    /// Issue another send submission for the (re-queued) backlog head.
    Send,
    /// Issue another recv submission.
    Recv,
    /// Issue a close submission; the connection has drained everything it
    /// owes the peer.
    Close,
}

/// One established (or connecting) socket and its send/receive pipelines.
///
/// All mutation happens on the ring's owning thread (§5); nothing here is
/// `Sync`.
pub struct Connection {
    id: u32,
    fd: RawFd,
    state: ConnState,

    send_backlog: VecDeque<Vec<u8>>,
    send_backlog_bytes: usize,
    send_in_flight: bool,
    watermark_bytes: usize,

    recv_in_flight: bool,
    decoder: FrameDecoder,
    inbound: VecDeque<Vec<u8>>,

    /// Tokens currently outstanding against this connection (recv/send/close
    /// in flight). The record cannot be dropped until this reaches zero
    /// after the close completion, per §4.4.
    pending_ops: u32,
}

impl Connection {
    /// A connection already past the handshake (e.g. from `accept`).
    pub fn open(id: u32, fd: RawFd, watermark_bytes: usize) -> Connection {
        Connection {
            id,
            fd,
            state: ConnState::Open,
            send_backlog: VecDeque::new(),
            send_backlog_bytes: 0,
            send_in_flight: false,
            watermark_bytes,
            recv_in_flight: false,
            decoder: FrameDecoder::new(),
            inbound: VecDeque::new(),
            pending_ops: 0,
        }
    }

    /// A connection still waiting on its `connect` completion.
    pub fn connecting(id: u32, fd: RawFd, watermark_bytes: usize) -> Connection {
        Connection {
            state: ConnState::Connecting,
            ..Connection::open(id, fd, watermark_bytes)
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Closed
    }

    pub fn note_issued(&mut self) {
        self.pending_ops += 1;
    }

    pub fn note_retired(&mut self) {
        self.pending_ops = self.pending_ops.saturating_sub(1);
    }

    pub fn pending_ops(&self) -> u32 {
        self.pending_ops
    }

    /// Pops the oldest frame delivered by the receive path, if any.
    pub fn take_frame(&mut self) -> Option<Vec<u8>> {
        self.inbound.pop_front()
    }

    /// The `connect` submission completed successfully.
    pub fn mark_connected(&mut self) -> Result<()> {
        if self.state != ConnState::Connecting {
            return Err(TransportError::fatal(
                "connect completion on a connection that was not connecting",
            ));
        }
        self.state = ConnState::Open;
        Ok(())
    }

    /// Queues `data` to be sent, framing it first. If nothing is currently
    /// in flight the caller should immediately issue a send submission for
    /// the new backlog head (`Action::Send`); otherwise it will be picked
    /// up once the in-flight send completes.
    pub fn enqueue_send(&mut self, payload: &[u8], max_frame: u32) -> Result<Action> {
        if self.state != ConnState::Open && self.state != ConnState::HalfClosedRemote {
            return Err(TransportError::fatal("send on a connection not open"));
        }
        if self.send_backlog_bytes + payload.len() > self.watermark_bytes {
            return Err(TransportError::resource("send backlog watermark exceeded"));
        }

        let framed = crate::framing::encode(payload, max_frame)?;
        self.send_backlog_bytes += framed.len();
        self.send_backlog.push_back(framed);

        if self.send_in_flight {
            Ok(Action::None)
        } else {
            self.send_in_flight = true;
            Ok(Action::Send)
        }
    }

    /// The bytes the next send submission should write: the backlog head.
    pub fn next_send_buffer(&self) -> Option<&[u8]> {
        self.send_backlog.front().map(Vec::as_slice)
    }

    /// A send submission completed with `result` bytes written (negative on
    /// error, handled by the caller via [`crate::error::TransportError::from_completion_result`]
    /// before calling this). Short writes re-queue the remainder and ask for
    /// another submission; a full write pops the backlog and either issues
    /// the next queued buffer or goes idle.
    pub fn on_send_completion(&mut self, written: usize) -> Action {
        let front = match self.send_backlog.front_mut() {
            Some(f) => f,
            None => {
                self.send_in_flight = false;
                return Action::None;
            }
        };

        if written >= front.len() {
            self.send_backlog_bytes -= front.len();
            self.send_backlog.pop_front();
        } else {
            self.send_backlog_bytes -= written;
            front.drain(..written);
        }

        if self.send_backlog.is_empty() {
            self.send_in_flight = false;
            if self.state == ConnState::HalfClosedRemote {
                self.state = ConnState::Closing;
                return Action::Close;
            }
            Action::None
        } else {
            Action::Send
        }
    }

    pub fn mark_recv_in_flight(&mut self) {
        self.recv_in_flight = true;
    }

    /// Drops the "a recv is outstanding" bit without touching anything else.
    /// Used when a recv is canceled: the connection stays open, but nothing
    /// is armed again until the caller asks for one.
    pub fn clear_recv_in_flight(&mut self) {
        self.recv_in_flight = false;
    }

    pub fn recv_in_flight(&self) -> bool {
        self.recv_in_flight
    }

    /// Feeds a filled receive buffer through the framing codec; every
    /// complete frame it yields is queued for [`Connection::take_frame`]. A
    /// zero-length `chunk` signals the peer half-closed (result == 0 on the
    /// recv completion).
    pub fn on_recv_completion(&mut self, chunk: &[u8], max_frame: u32) -> Result<Action> {
        self.recv_in_flight = false;

        if chunk.is_empty() {
            return Ok(self.on_peer_half_close());
        }

        let inbound = &mut self.inbound;
        self.decoder.decode(chunk, max_frame, |frame| {
            inbound.push_back(frame.to_vec());
            Ok(())
        })?;
        self.recv_in_flight = true;
        Ok(Action::Recv)
    }

    fn on_peer_half_close(&mut self) -> Action {
        match self.state {
            ConnState::Open => {
                self.state = ConnState::HalfClosedRemote;
                if self.send_backlog.is_empty() {
                    self.state = ConnState::Closing;
                    Action::Close
                } else {
                    Action::None
                }
            }
            ConnState::HalfClosedLocal => {
                self.state = ConnState::Closing;
                Action::Close
            }
            _ => Action::None,
        }
    }

    /// The user asked to close. If a send is still draining, the close is
    /// deferred until it finishes; otherwise the driver should submit the
    /// close immediately.
    pub fn request_close(&mut self) -> Action {
        match self.state {
            ConnState::Closed | ConnState::Closing => Action::None,
            _ if self.send_in_flight || !self.send_backlog.is_empty() => {
                self.state = ConnState::HalfClosedLocal;
                Action::None
            }
            _ => {
                self.state = ConnState::Closing;
                Action::Close
            }
        }
    }

    /// The close submission completed. The caller still must wait for
    /// [`crate::token::TokenTable::outstanding`] to confirm no other tokens
    /// reference this connection before dropping its record, per §4.4.
    pub fn on_close_completion(&mut self) {
        self.state = ConnState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_with_nothing_in_flight_asks_for_a_submission() {
        let mut conn = Connection::open(1, -1, 1 << 20);
        assert_eq!(conn.enqueue_send(b"hi", 1 << 20).unwrap(), Action::Send);
        assert_eq!(conn.enqueue_send(b"there", 1 << 20).unwrap(), Action::None);
    }

    #[test]
    fn short_write_requeues_remaining_bytes() {
        let mut conn = Connection::open(1, -1, 1 << 20);
        conn.enqueue_send(b"hello", 1 << 20).unwrap();
        let framed_len = conn.next_send_buffer().unwrap().len();

        assert_eq!(conn.on_send_completion(2), Action::Send);
        assert_eq!(conn.next_send_buffer().unwrap().len(), framed_len - 2);

        assert_eq!(conn.on_send_completion(framed_len - 2), Action::None);
        assert!(conn.next_send_buffer().is_none());
    }

    #[test]
    fn backlog_over_watermark_is_rejected() {
        let mut conn = Connection::open(1, -1, 8);
        let err = conn.enqueue_send(&[0u8; 64], 1 << 20).unwrap_err();
        assert!(matches!(err, TransportError::Resource { .. }));
    }

    #[test]
    fn peer_half_close_with_empty_backlog_requests_a_close() {
        let mut conn = Connection::open(1, -1, 1 << 20);
        let action = conn.on_recv_completion(&[], 1 << 20).unwrap();
        assert_eq!(action, Action::Close);
        assert_eq!(conn.state(), ConnState::Closing);
    }

    #[test]
    fn peer_half_close_with_pending_sends_waits_for_drain() {
        let mut conn = Connection::open(1, -1, 1 << 20);
        conn.enqueue_send(b"pending", 1 << 20).unwrap();

        let action = conn.on_recv_completion(&[], 1 << 20).unwrap();
        assert_eq!(action, Action::None);
        assert_eq!(conn.state(), ConnState::HalfClosedRemote);

        let framed_len = conn.next_send_buffer().unwrap().len();
        assert_eq!(conn.on_send_completion(framed_len), Action::Close);
        assert_eq!(conn.state(), ConnState::Closing);
    }

    #[test]
    fn recv_completion_yields_complete_frames() {
        let mut conn = Connection::open(1, -1, 1 << 20);
        let framed = crate::framing::encode(b"payload", 1 << 20).unwrap();

        conn.on_recv_completion(&framed, 1 << 20).unwrap();

        assert_eq!(conn.take_frame(), Some(b"payload".to_vec()));
        assert_eq!(conn.take_frame(), None);
    }

    #[test]
    fn close_requested_while_sending_defers_until_drained() {
        let mut conn = Connection::open(1, -1, 1 << 20);
        conn.enqueue_send(b"draining", 1 << 20).unwrap();

        assert_eq!(conn.request_close(), Action::None);
        assert_eq!(conn.state(), ConnState::HalfClosedLocal);

        let framed_len = conn.next_send_buffer().unwrap().len();
        assert_eq!(conn.on_send_completion(framed_len), Action::None);

        assert_eq!(conn.request_close(), Action::Close);
        assert_eq!(conn.state(), ConnState::Closing);
    }
}
