//! Provided-buffer ring wrapper (§4.2): lets the kernel pick a receive
//! buffer at completion time instead of the caller committing one to each
//! `recv` submission.

use myra_uring::cqueue;
use myra_uring::IoUring;

use crate::error::{Result, TransportError};

/// A registered group of `count` kernel-managed receive buffers.
pub struct ProvidedBufferRing {
    ring: myra_uring::buf_ring::BufRing,
    group_id: u16,
    count: u16,
    entry_size: u32,
    leased: Vec<bool>,
}

impl ProvidedBufferRing {
    /// Allocates `count` buffers of `size` bytes, publishes them to `ring`
    /// under `group_id`, and pre-fills the kernel-visible free list.
    pub fn create(ring: &IoUring, group_id: u16, count: u16, size: u32) -> Result<Self> {
        // `BufRing::new` already seeds every slot (via its internal `init`) so the
        // kernel can immediately pop one on the first completion.
        let buf_ring = myra_uring::buf_ring::BufRing::new(count, size)
            .map_err(|e| TransportError::resource_with_cause("allocate buffer ring", e))?;

        unsafe {
            ring.submitter()
                .register_buf_ring(buf_ring.addr(), count, group_id)
                .map_err(|e| {
                    if e.raw_os_error() == Some(libc::ENOSYS) {
                        TransportError::unsupported_feature(
                            "IORING_REGISTER_PBUF_RING (buffer rings, needs a newer kernel)",
                        )
                    } else {
                        TransportError::resource_with_cause("register buffer ring", e)
                    }
                })?;
        }

        Ok(ProvidedBufferRing {
            ring: buf_ring,
            group_id,
            count,
            entry_size: size,
            leased: vec![false; count as usize],
        })
    }

    pub fn group_id(&self) -> u16 {
        self.group_id
    }

    pub fn entry_size(&self) -> u32 {
        self.entry_size
    }

    /// Decode the buffer id a receive completion selected, marking it
    /// leased. Returns `None` if the completion did not select a buffer
    /// (e.g. it came from a non-buffer-select submission).
    pub fn take_from_completion(&mut self, cqe: &cqueue::Entry) -> Option<u16> {
        let id = cqueue::buffer_select(cqe.flags())?;
        self.leased[id as usize] = true;
        Some(id)
    }

    /// Returns buffer `id` to the kernel-visible free list, for reuse by a
    /// future receive.
    pub fn return_buffer(&mut self, id: u16) {
        debug_assert!(self.leased[id as usize], "returning a buffer not leased: {id}");
        self.leased[id as usize] = false;
        let mut submissions = self.ring.submissions();
        unsafe {
            submissions.recycle_by_index(id);
        }
    }

    /// Copies `len` bytes out of whichever buffer a completion with `flags`
    /// selected, and immediately recycles it back to the kernel-visible
    /// free list. The usual path for a single-shot recv: no explicit lease
    /// bookkeeping needed since the copy happens before the buffer is
    /// recycled.
    pub fn consume(&mut self, flags: u32, len: usize) -> Vec<u8> {
        let mut submissions = self.ring.submissions();
        let buf = unsafe { submissions.get(flags, len) };
        buf.to_vec()
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    /// Unregisters the buffer ring. Only valid once every leased buffer has
    /// been returned.
    pub fn unregister(&self, ring: &IoUring) -> Result<()> {
        debug_assert!(
            self.leased.iter().all(|l| !l),
            "unregistering a buffer ring with leases outstanding"
        );
        ring.submitter()
            .unregister_buf_ring(self.group_id)
            .map_err(|e| TransportError::resource_with_cause("unregister buffer ring", e))
    }
}
