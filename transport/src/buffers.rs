//! Fixed buffer registry (§4.1).
//!
//! Amortizes kernel registration of I/O memory so hot-path submissions carry
//! only a small index. Acquire/release is always single-threaded (§5), so a
//! plain `Vec`-backed LIFO free-list of indices is simpler than a bitmap and
//! meets the "must not starve indices" requirement trivially: every released
//! index is immediately eligible again.

use myra_uring::IoUring;

use crate::error::{Result, TransportError};

/// A pinned, kernel-registered set of `count` buffers of `size` bytes each.
pub struct BufferRegistry {
    storage: Vec<u8>,
    size: usize,
    free: Vec<u32>,
    registered: bool,
}

impl BufferRegistry {
    /// Pins `count * size` bytes of memory and registers it with `ring`'s
    /// fixed-buffer table. Fails with [`TransportError::Resource`] if the
    /// kernel refuses (commonly `EPERM` due to locked-memory limits, or
    /// `ENOMEM`).
    pub fn register(ring: &IoUring, count: u32, size: u32) -> Result<BufferRegistry> {
        let size = size as usize;
        let mut storage = vec![0u8; count as usize * size];
        let iovecs: Vec<libc::iovec> = storage
            .chunks_mut(size)
            .map(|chunk| libc::iovec {
                iov_base: chunk.as_mut_ptr().cast(),
                iov_len: chunk.len(),
            })
            .collect();

        unsafe {
            ring.submitter().register_buffers(&iovecs).map_err(|e| {
                if e.raw_os_error() == Some(libc::ENOSYS) {
                    TransportError::unsupported_feature("IORING_REGISTER_BUFFERS (fixed buffers)")
                } else {
                    TransportError::resource_with_cause("register fixed buffers", e)
                }
            })?;
        }

        Ok(BufferRegistry {
            storage,
            size,
            free: (0..count).rev().collect(),
            registered: true,
        })
    }

    /// Returns an index not currently leased. Does not block; fails with
    /// [`TransportError::Resource`] if every buffer is leased.
    pub fn acquire(&mut self) -> Result<u32> {
        self.free
            .pop()
            .ok_or_else(|| TransportError::resource("fixed buffer pool exhausted"))
    }

    /// Marks `index` free again. Releasing an index that is not currently
    /// leased is a caller bug; debug builds assert on it.
    pub fn release(&mut self, index: u32) {
        debug_assert!(
            !self.free.contains(&index),
            "releasing a fixed buffer index that was not leased: {index}"
        );
        self.free.push(index);
    }

    /// The raw memory backing `index`, for staging a send or reading a recv
    /// result.
    pub fn buffer_mut(&mut self, index: u32) -> &mut [u8] {
        let start = index as usize * self.size;
        &mut self.storage[start..start + self.size]
    }

    pub fn buffer(&self, index: u32) -> &[u8] {
        let start = index as usize * self.size;
        &self.storage[start..start + self.size]
    }

    pub fn buffer_size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.storage.len() / self.size.max(1)
    }

    /// Unpins the memory. Only valid when no leases are outstanding; debug
    /// builds assert this.
    pub fn unregister(&mut self, ring: &IoUring) -> Result<()> {
        debug_assert_eq!(
            self.free.len(),
            self.capacity(),
            "unregistering fixed buffers with leases outstanding"
        );
        if self.registered {
            ring.submitter()
                .unregister_buffers()
                .map_err(|e| TransportError::resource_with_cause("unregister fixed buffers", e))?;
            self.registered = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Exercises the free-list bookkeeping without touching the kernel: a
    // registry with a pre-seeded free-list and no backing `IoUring`.
    fn bare(count: u32, size: u32) -> BufferRegistry {
        BufferRegistry {
            storage: vec![0u8; count as usize * size as usize],
            size: size as usize,
            free: (0..count).rev().collect(),
            registered: false,
        }
    }

    #[test]
    fn acquire_never_hands_out_the_same_index_twice() {
        let mut reg = bare(4, 64);
        let mut leased = Vec::new();
        for _ in 0..4 {
            leased.push(reg.acquire().unwrap());
        }
        assert!(reg.acquire().is_err());

        let mut sorted = leased.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3]);
    }

    #[test]
    fn released_index_is_immediately_reusable() {
        let mut reg = bare(2, 64);
        let a = reg.acquire().unwrap();
        let _b = reg.acquire().unwrap();
        reg.release(a);
        assert_eq!(reg.acquire().unwrap(), a);
    }
}
