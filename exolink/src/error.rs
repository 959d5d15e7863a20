//! Error types for exolink transport operations.

use std::fmt;
use std::io;

pub use exolink_proto::ProtocolError;

use crate::session::SessionState;

/// Transfer direction of a tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host ← loader.
    Read,
    /// Host → loader.
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
        })
    }
}

/// Failures of a tracked read or write on an established connection.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum IoError {
    /// The stream closed while an operation was outstanding.
    #[error("stream closed mid-operation")]
    Aborted,

    /// A completion was awaited with nothing issued in that direction.
    ///
    /// Reusing a completion that belongs to no operation corrupts data or
    /// hangs; it is a caller bug and is rejected rather than tolerated.
    #[error("no pending {0} operation to await")]
    NotPending(Direction),

    /// A second operation was issued in a direction that already has one
    /// outstanding. At most one read and one write may be in flight.
    #[error("a {0} operation is already outstanding")]
    DoubleIssue(Direction),

    /// Any other completion failure, with the underlying OS error.
    #[error(transparent)]
    Other(io::Error),
}

impl IoError {
    /// Maps an OS error to the transport taxonomy: connection-teardown
    /// kinds collapse into [`IoError::Aborted`].
    pub(crate) fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::UnexpectedEof => Self::Aborted,
            _ => Self::Other(err),
        }
    }
}

/// Failures while establishing a connection to the loader endpoint.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConnectError {
    /// Every attempt was spent without the endpoint becoming available.
    #[error("endpoint did not become available within {attempts} attempts")]
    Timeout {
        /// How many open attempts were made.
        attempts: u32,
    },

    /// An unrecoverable open failure (permission, bad name); retrying
    /// cannot help.
    #[error("unrecoverable open failure")]
    OsFailure(#[source] io::Error),
}

/// What went wrong inside a failed upload session.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FailureReason {
    /// Connection establishment failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// A tracked read or write failed after the connection was up.
    #[error(transparent)]
    Io(#[from] IoError),

    /// The byte stream violated the wire format.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// `run` was called on a session that already ran. Sessions are
    /// single-shot; resuming mid-stream is not defined by the protocol.
    #[error("session already ran; start a new session")]
    Replayed,
}

/// A failed upload session: which state it failed in, and why.
///
/// The phase splits target-side from host-side faults for the operator:
/// a failure while `connecting` points at the loader not serving its
/// endpoint, while one in `awaiting-reply` points at the loader accepting
/// bytes but never acknowledging them.
#[derive(Debug, thiserror::Error)]
#[error("upload failed in state {phase}")]
#[non_exhaustive]
pub struct SessionError {
    /// Session state at the time of failure.
    pub phase: SessionState,
    /// Underlying failure.
    #[source]
    pub reason: FailureReason,
}
