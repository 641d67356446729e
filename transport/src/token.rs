//! Request tokens (§3): a 64-bit value packed as an 8-bit opcode tag, a
//! 24-bit connection id, and a 32-bit monotonic sequence. Every submission
//! in every mode (§4.3's "added" note) carries one, so the driver always has
//! a stable way to recover "which connection, which op" from a completion.

use slab::Slab;

const CONN_ID_MASK: u64 = (1 << 24) - 1;

/// What kind of request a token was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Accept,
    Connect,
    Recv,
    Send,
    Close,
    Cancel,
    Timeout,
}

impl OpKind {
    fn tag(self) -> u8 {
        match self {
            OpKind::Accept => 1,
            OpKind::Connect => 2,
            OpKind::Recv => 3,
            OpKind::Send => 4,
            OpKind::Close => 5,
            OpKind::Cancel => 6,
            OpKind::Timeout => 7,
        }
    }
}

/// What an in-flight token refers to, kept around until its completion is
/// reaped so the driver can route it back to the right connection.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub op: OpKind,
    pub conn_id: u32,
}

fn pack(tag: u8, conn_id: u32, seq: u32) -> u64 {
    debug_assert!(
        u64::from(conn_id) <= CONN_ID_MASK,
        "connection id does not fit in 24 bits: {conn_id}"
    );
    (u64::from(tag) << 56) | ((u64::from(conn_id) & CONN_ID_MASK) << 32) | u64::from(seq)
}

pub fn opcode_tag(token: u64) -> u8 {
    (token >> 56) as u8
}

pub fn connection_id(token: u64) -> u32 {
    ((token >> 32) & CONN_ID_MASK) as u32
}

pub fn sequence(token: u64) -> u32 {
    token as u32
}

/// Ring-local table mapping outstanding tokens to their [`RequestContext`].
///
/// Tokens are retired exactly once: `issue` draws a slab slot (the
/// sequence), `retire` frees it. Because a slab slot can be reused by a
/// later `issue` once its context has been retired, a stale completion
/// arriving for an already-retired token is detected by comparing the
/// token's encoded tag/connection-id against whatever (possibly unrelated)
/// context currently occupies that slot, and is rejected rather than
/// mis-routed.
pub struct TokenTable {
    slots: Slab<RequestContext>,
}

impl TokenTable {
    pub fn new() -> TokenTable {
        TokenTable { slots: Slab::new() }
    }

    pub fn with_capacity(capacity: usize) -> TokenTable {
        TokenTable {
            slots: Slab::with_capacity(capacity),
        }
    }

    /// Issues a new token for `op` on `conn_id`.
    pub fn issue(&mut self, op: OpKind, conn_id: u32) -> u64 {
        let seq = self.slots.insert(RequestContext { op, conn_id }) as u32;
        pack(op.tag(), conn_id, seq)
    }

    /// Looks up `token`'s context without retiring it. Used for multishot
    /// completions, which keep their token alive across many completions
    /// until the kernel marks one as final.
    pub fn peek(&self, token: u64) -> Option<&RequestContext> {
        let ctx = self.slots.get(sequence(token) as usize)?;
        if ctx.op.tag() == opcode_tag(token) && ctx.conn_id == connection_id(token) {
            Some(ctx)
        } else {
            None
        }
    }

    /// Retires `token`, returning its context if it was live and the token
    /// was not stale.
    pub fn retire(&mut self, token: u64) -> Option<RequestContext> {
        let seq = sequence(token) as usize;
        match self.slots.get(seq) {
            Some(ctx) if ctx.op.tag() == opcode_tag(token) && ctx.conn_id == connection_id(token) => {
                Some(self.slots.remove(seq))
            }
            _ => None,
        }
    }

    pub fn outstanding(&self) -> usize {
        self.slots.len()
    }
}

impl Default for TokenTable {
    fn default() -> Self {
        TokenTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_issued_token_retires_exactly_once() {
        let mut table = TokenTable::new();
        let token = table.issue(OpKind::Recv, 7);

        assert_eq!(opcode_tag(token), OpKind::Recv.tag());
        assert_eq!(connection_id(token), 7);

        let ctx = table.retire(token).expect("token should be live");
        assert_eq!(ctx.conn_id, 7);
        assert!(table.retire(token).is_none(), "retiring twice must fail");
    }

    #[test]
    fn stale_token_is_rejected_after_slot_reuse() {
        let mut table = TokenTable::new();
        let first = table.issue(OpKind::Send, 1);
        table.retire(first).unwrap();

        // Reuses the same slab slot (sequence) for an unrelated request.
        let second = table.issue(OpKind::Recv, 2);
        assert_eq!(sequence(first), sequence(second));

        assert!(table.retire(first).is_none());
        assert!(table.retire(second).is_some());
    }
}
