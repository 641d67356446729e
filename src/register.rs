//! Types used by [`Submitter`](crate::Submitter)'s register calls.

use core::fmt;

use crate::sys;

/// Information about what `io_uring` opcodes the kernel supports.
///
/// Filled in by [`register_probe`](crate::Submitter::register_probe).
pub struct Probe(Box<sys::io_uring_probe>);

impl Probe {
    /// Create a new probe with no opcodes marked supported.
    pub fn new() -> Probe {
        Probe(Box::new(sys::io_uring_probe::default()))
    }

    #[inline]
    pub(crate) fn as_mut_ptr(&mut self) -> *mut sys::io_uring_probe {
        &mut *self.0
    }

    /// Get whether a specific opcode is supported.
    pub fn is_supported(&self, opcode: u8) -> bool {
        if opcode as u8 <= self.0.last_op {
            self.0.ops[opcode as usize].flags & sys::IO_URING_OP_SUPPORTED != 0
        } else {
            false
        }
    }
}

impl Default for Probe {
    #[inline]
    fn default() -> Probe {
        Probe::new()
    }
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let supported = (0..=self.0.last_op)
            .filter(|&op| self.is_supported(op))
            .collect::<Vec<_>>();
        f.debug_struct("Probe")
            .field("last_op", &self.0.last_op)
            .field("supported_ops", &supported)
            .finish()
    }
}
