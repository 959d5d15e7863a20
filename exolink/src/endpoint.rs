//! Named duplex-stream endpoints.
//!
//! The transport core never opens sockets itself; it asks an [`Endpoint`]
//! to turn a name into a duplex byte stream. That keeps OS-level
//! connection mechanics (and test doubles) outside the retry and upload
//! logic.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio::time::Instant;
use tracing::trace;

/// A named connectable object that yields duplex byte streams.
#[allow(async_fn_in_trait)] // callers run on a local runtime; no Send bound needed
pub trait Endpoint {
    /// Stream type produced by a successful open.
    type Stream: AsyncRead + AsyncWrite + Unpin;

    /// Opens the endpoint, distinguishing contention from real failures.
    async fn open(&self, name: &str) -> Result<Self::Stream, OpenError>;

    /// Best-effort wait for a busy endpoint to become connectable,
    /// bounded by `timeout`.
    ///
    /// May race with other clients grabbing the endpoint first; the
    /// establisher's retry loop absorbs that race.
    async fn wait_ready(&self, name: &str, timeout: Duration);
}

/// Why an open attempt did not produce a stream.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum OpenError {
    /// The endpoint exists but cannot take a connection right now.
    #[error("endpoint busy")]
    Busy,

    /// Any other open failure.
    #[error(transparent)]
    Os(#[from] io::Error),
}

/// Interval between connectability probes while waiting on a busy
/// endpoint.
const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// [`Endpoint`] over Unix domain sockets; the name is a filesystem path.
///
/// `ConnectionRefused` and `WouldBlock` map to [`OpenError::Busy`]: the
/// socket exists but nobody is accepting. `NotFound` stays an OS error
/// (the loader has not created its endpoint yet) and is handled on the
/// establisher's generic retry path.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixEndpoint;

impl Endpoint for UnixEndpoint {
    type Stream = UnixStream;

    async fn open(&self, name: &str) -> Result<UnixStream, OpenError> {
        UnixStream::connect(name).await.map_err(|e| match e.kind() {
            io::ErrorKind::ConnectionRefused | io::ErrorKind::WouldBlock => OpenError::Busy,
            _ => OpenError::Os(e),
        })
    }

    async fn wait_ready(&self, name: &str, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            // A successful probe is dropped immediately; the caller's next
            // open() attempt takes the real connection.
            if UnixStream::connect(name).await.is_ok() {
                trace!(name, "endpoint became connectable");
                return;
            }
            tokio::time::sleep_until(deadline.min(Instant::now() + PROBE_INTERVAL)).await;
        }
        trace!(name, "endpoint still unavailable after busy wait");
    }
}
