//! The five-category error taxonomy described in SPEC_FULL.md §7.

use std::io;

/// An error surfaced by any part of the transport.
///
/// Every variant carries a human-readable message and, where one exists, the
/// `io::Error` (usually decoded from a completion's negative `result`) that
/// caused it.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Recoverable locally by re-submission or by pumping completions:
    /// `EAGAIN`, `ENOBUFS`, a full completion ring, a short write still
    /// within its normal re-submit handling.
    #[error("transient: {message}")]
    Transient {
        message: String,
        #[source]
        cause: Option<io::Error>,
    },

    /// Peer reset, refused, unreachable, or an unexpected half-close during
    /// handshake. The connection is torn down.
    #[error("network: {message}")]
    Network {
        message: String,
        #[source]
        cause: Option<io::Error>,
    },

    /// A length-prefix bound was violated: zero-length frame, oversized
    /// frame, or a destination smaller than the frame promised. Fatal for
    /// the connection; not retryable.
    #[error("framing: {message}")]
    Framing { message: String },

    /// Locked-memory limit, descriptor limit, fixed-buffer exhaustion, or
    /// token table exhaustion. May be retried once the pressure abates.
    #[error("resource: {message}")]
    Resource {
        message: String,
        #[source]
        cause: Option<io::Error>,
    },

    /// The request was canceled: either an explicit `async_cancel` or a
    /// linked timeout firing first. Distinct from `Transient` because a
    /// canceled request is never silently resubmitted by the driver — the
    /// caller decides whether to issue a new one.
    #[error("canceled: {message}")]
    Canceled { message: String },

    /// A required opcode or setup flag was absent from the feature mask the
    /// kernel returned at ring setup (buffer rings and multishot ops need a
    /// newer kernel than plain accept/recv/send). Names the missing
    /// opcode/flag; setup fails rather than falling back silently.
    #[error("unsupported feature: {feature}")]
    UnsupportedFeature { feature: String },

    /// Ring setup failure after a successful feature probe, corrupt
    /// shared-memory indices, or a driver invariant violation. Triggers
    /// driver shutdown.
    #[error("fatal: {message}")]
    Fatal {
        message: String,
        #[source]
        cause: Option<io::Error>,
    },
}

impl TransportError {
    pub fn transient(message: impl Into<String>) -> Self {
        TransportError::Transient {
            message: message.into(),
            cause: None,
        }
    }

    pub fn network(message: impl Into<String>, cause: io::Error) -> Self {
        TransportError::Network {
            message: message.into(),
            cause: Some(cause),
        }
    }

    pub fn framing(message: impl Into<String>) -> Self {
        TransportError::Framing {
            message: message.into(),
        }
    }

    pub fn resource(message: impl Into<String>) -> Self {
        TransportError::Resource {
            message: message.into(),
            cause: None,
        }
    }

    pub fn resource_with_cause(message: impl Into<String>, cause: io::Error) -> Self {
        TransportError::Resource {
            message: message.into(),
            cause: Some(cause),
        }
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        TransportError::Canceled {
            message: message.into(),
        }
    }

    pub fn unsupported_feature(feature: impl Into<String>) -> Self {
        TransportError::UnsupportedFeature {
            feature: feature.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        TransportError::Fatal {
            message: message.into(),
            cause: None,
        }
    }

    /// `true` if a caller could usefully try the same operation again after
    /// pumping completions, as opposed to one that tore down the connection.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Transient { .. })
    }

    /// `true` if this is a request canceled by the driver (explicit cancel
    /// or a linked timeout), as opposed to any other failure category.
    pub fn is_canceled(&self) -> bool {
        matches!(self, TransportError::Canceled { .. })
    }

    /// Translate a completion's negative `result` into a category, following
    /// §4.3's classification table.
    pub fn from_completion_result(res: i32, context: &str) -> TransportError {
        debug_assert!(res < 0);
        let errno = -res;
        let cause = io::Error::from_raw_os_error(errno);
        match errno {
            libc::EAGAIN | libc::ENOBUFS | libc::EINTR => TransportError::Transient {
                message: format!("{context}: {cause}"),
                cause: Some(cause),
            },
            libc::ECANCELED => TransportError::Canceled {
                message: format!("{context}: canceled"),
            },
            libc::ECONNRESET | libc::ECONNREFUSED | libc::EHOSTUNREACH | libc::ENETUNREACH
            | libc::EPIPE => TransportError::Network {
                message: format!("{context}: {cause}"),
                cause: Some(cause),
            },
            libc::ENOMEM | libc::EMFILE | libc::ENFILE | libc::EPERM => TransportError::Resource {
                message: format!("{context}: {cause}"),
                cause: Some(cause),
            },
            _ => TransportError::Fatal {
                message: format!("{context}: {cause}"),
                cause: Some(cause),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
