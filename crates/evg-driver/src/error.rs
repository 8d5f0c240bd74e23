use std::io;
use std::net::SocketAddr;

use thiserror::Error;

pub type Result<T, E = EvgError> = std::result::Result<T, E>;

/// Failure taxonomy of the driver. Every public operation returns one of
/// these; none of them triggers an automatic operation-level retry.
#[derive(Debug, Error)]
pub enum EvgError {
    /// An input outside its documented domain. Checked before any wire
    /// traffic happens.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The named device is not registered.
    #[error("unknown device {name:?}")]
    UnknownDevice { name: String },

    /// Every send attempt went unanswered within the per-attempt reply
    /// timeout.
    #[error("no reply from {endpoint} after {attempts} attempts")]
    TransportTimeout { endpoint: SocketAddr, attempts: u32 },

    /// A verified write reached the card but the read-back disagrees. The
    /// card may be in a transient state the driver cannot diagnose, so the
    /// caller decides whether to retry.
    #[error(
        "register {register:#04x} reads back {read_back:#06x} after writing {written:#06x}"
    )]
    VerifyMismatch {
        register: u16,
        written: u16,
        read_back: u16,
    },

    /// The device table already holds the maximum number of devices.
    #[error("device table is full ({max} devices)")]
    ConfigFull { max: usize },

    /// Socket creation, connect, or use failed outside the retry loop.
    #[error("{context}: {source}")]
    Socket {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl EvgError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        EvgError::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn socket(context: impl Into<String>, source: io::Error) -> Self {
        EvgError::Socket {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn not_ready(name: &str) -> Self {
        EvgError::Socket {
            context: format!("device {name:?} is not initialized"),
            source: io::ErrorKind::NotConnected.into(),
        }
    }
}
