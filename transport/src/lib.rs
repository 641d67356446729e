//! A length-prefixed point-to-point message transport built directly on
//! `myra-uring`: fixed or provided-buffer receive paths, a per-connection
//! state machine, and a token-tagged completion router, all running on a
//! single thread per ring.

mod buf_ring;
mod buffers;
mod config;
mod connection;
mod driver;
pub mod error;
mod framing;
mod token;
mod transport;

pub use config::{BufferRing, Config, FixedBuffers, Mode, Pinning};
pub use connection::{Action, ConnState};
pub use driver::{Driver, DriverEvent};
pub use error::{Result, TransportError};
pub use framing::{decode_into, encode, FrameDecoder};
pub use transport::{ConnectionHandle, Transport};
