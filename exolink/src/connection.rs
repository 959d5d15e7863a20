//! An established duplex link with per-direction completion tracking.
//!
//! The loader side of the link is an asynchronous primitive: reads and
//! writes are *issued*, may complete inline, and are otherwise *awaited*
//! separately. [`Connection`] wraps one stream and tracks at most one
//! outstanding operation per direction, so a completion can never be
//! confused with an operation that was never issued.

use std::future::poll_fn;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use exolink_proto::{Header, PAGE_SIZE};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tracing::trace;

use crate::error::{Direction, IoError};

/// Maximum reply size read back from the loader: one page.
pub const REPLY_MAX: usize = PAGE_SIZE;

/// How an issued operation resolved at issue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The operation completed inline with this many bytes transferred.
    Immediate(usize),
    /// The operation is outstanding; await it to completion.
    Pending,
}

/// Completion-tracking state for the read direction.
///
/// The lane owns its transfer buffer, so a pending read never points at
/// caller memory and cancellation cannot leave a completion writing into
/// a freed buffer.
#[derive(Debug)]
enum ReadLane {
    /// No read outstanding.
    Idle,
    /// A read was issued and has not completed.
    Pending {
        /// Destination buffer, sized at issue time.
        buf: Vec<u8>,
    },
}

/// Completion-tracking state for the write direction.
#[derive(Debug)]
enum WriteLane {
    /// No write outstanding.
    Idle,
    /// A write was issued and has not completed.
    Pending {
        /// Copy of the bytes the pending write will deliver.
        buf: Vec<u8>,
    },
}

/// An established duplex stream with one tracked read and one tracked
/// write lane.
///
/// Owns the stream exclusively; dropping the connection (or calling
/// [`Connection::close`]) cancels anything outstanding and releases the
/// handle. That teardown path is the only one, and runs on every exit.
#[derive(Debug)]
pub struct Connection<S> {
    /// Read half of the stream.
    reader: ReadHalf<S>,
    /// Write half of the stream.
    writer: WriteHalf<S>,
    /// Read-direction tracking state.
    read_lane: ReadLane,
    /// Write-direction tracking state.
    write_lane: WriteLane,
    /// Data from the most recently completed read.
    last_read: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite> Connection<S> {
    /// Wraps a freshly opened stream. Both lanes start idle.
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader,
            writer,
            read_lane: ReadLane::Idle,
            write_lane: WriteLane::Idle,
            last_read: Vec::new(),
        }
    }

    /// True iff a read has been issued but not yet completed.
    pub fn read_pending(&self) -> bool {
        matches!(self.read_lane, ReadLane::Pending { .. })
    }

    /// True iff a write has been issued but not yet completed.
    pub fn write_pending(&self) -> bool {
        matches!(self.write_lane, WriteLane::Pending { .. })
    }

    /// Data delivered by the most recently completed read.
    pub fn last_read(&self) -> &[u8] {
        &self.last_read
    }

    /// Starts a read of up to `max_len` bytes.
    ///
    /// Polls the stream once without suspending: inline completion
    /// returns [`Outcome::Immediate`] with the data available via
    /// [`Connection::last_read`]; otherwise the read is left outstanding
    /// and must be resolved with [`Connection::await_read`].
    pub fn issue_read(&mut self, max_len: usize) -> Result<Outcome, IoError> {
        if self.read_pending() {
            return Err(IoError::DoubleIssue(Direction::Read));
        }
        let mut buf = vec![0u8; max_len];
        let mut read_buf = ReadBuf::new(&mut buf);
        let mut cx = Context::from_waker(Waker::noop());
        match Pin::new(&mut self.reader).poll_read(&mut cx, &mut read_buf) {
            Poll::Ready(Ok(())) => {
                let n = read_buf.filled().len();
                if n == 0 && max_len > 0 {
                    return Err(IoError::Aborted);
                }
                buf.truncate(n);
                self.last_read = buf;
                trace!(bytes = n, "read completed inline");
                Ok(Outcome::Immediate(n))
            }
            Poll::Ready(Err(e)) => Err(IoError::from_io(e)),
            Poll::Pending => {
                self.read_lane = ReadLane::Pending { buf };
                trace!(max_len, "read left outstanding");
                Ok(Outcome::Pending)
            }
        }
    }

    /// Suspends until the outstanding read completes; returns the byte
    /// count, with the data available via [`Connection::last_read`].
    ///
    /// Fails fast with [`IoError::NotPending`] when no read is
    /// outstanding; a completion is never manufactured from stale state.
    pub async fn await_read(&mut self) -> Result<usize, IoError> {
        let ReadLane::Pending { mut buf } = mem::replace(&mut self.read_lane, ReadLane::Idle)
        else {
            return Err(IoError::NotPending(Direction::Read));
        };
        let reader = &mut self.reader;
        let result = poll_fn(|cx| {
            let mut read_buf = ReadBuf::new(&mut buf);
            Pin::new(&mut *reader)
                .poll_read(cx, &mut read_buf)
                .map(|r| r.map(|()| read_buf.filled().len()))
        })
        .await;
        match result {
            Ok(0) => Err(IoError::Aborted),
            Ok(n) => {
                buf.truncate(n);
                self.last_read = buf;
                trace!(bytes = n, "read completed");
                Ok(n)
            }
            Err(e) => Err(IoError::from_io(e)),
        }
    }

    /// Starts a write of `data`.
    ///
    /// Polls the stream once without suspending: inline completion
    /// returns [`Outcome::Immediate`] with the number of bytes the stream
    /// accepted (which may be fewer than `data.len()`); otherwise the
    /// bytes are copied into the lane and the write must be resolved with
    /// [`Connection::await_write`].
    pub fn issue_write(&mut self, data: &[u8]) -> Result<Outcome, IoError> {
        if self.write_pending() {
            return Err(IoError::DoubleIssue(Direction::Write));
        }
        let mut cx = Context::from_waker(Waker::noop());
        match Pin::new(&mut self.writer).poll_write(&mut cx, data) {
            Poll::Ready(Ok(0)) if !data.is_empty() => Err(IoError::Aborted),
            Poll::Ready(Ok(n)) => {
                trace!(bytes = n, "write completed inline");
                Ok(Outcome::Immediate(n))
            }
            Poll::Ready(Err(e)) => Err(IoError::from_io(e)),
            Poll::Pending => {
                self.write_lane = WriteLane::Pending {
                    buf: data.to_vec(),
                };
                trace!(bytes = data.len(), "write left outstanding");
                Ok(Outcome::Pending)
            }
        }
    }

    /// Suspends until the outstanding write completes; returns how many
    /// bytes the stream accepted (possibly fewer than were issued).
    pub async fn await_write(&mut self) -> Result<usize, IoError> {
        let WriteLane::Pending { buf } = mem::replace(&mut self.write_lane, WriteLane::Idle)
        else {
            return Err(IoError::NotPending(Direction::Write));
        };
        let writer = &mut self.writer;
        let result = poll_fn(|cx| Pin::new(&mut *writer).poll_write(cx, &buf)).await;
        match result {
            Ok(0) if !buf.is_empty() => Err(IoError::Aborted),
            Ok(n) => {
                trace!(bytes = n, "write completed");
                Ok(n)
            }
            Err(e) => Err(IoError::from_io(e)),
        }
    }

    /// Writes all of `data`, looping over partial completions until the
    /// cumulative count equals `data.len()`.
    ///
    /// A single write may be accepted short; assuming one call suffices
    /// silently truncates the stream, so every send in the protocol goes
    /// through this loop.
    pub async fn send_all(&mut self, data: &[u8]) -> Result<(), IoError> {
        let mut sent = 0;
        while sent < data.len() {
            let n = match self.issue_write(&data[sent..])? {
                Outcome::Immediate(n) => n,
                Outcome::Pending => self.await_write().await?,
            };
            sent += n;
        }
        Ok(())
    }

    /// Reads whatever the stream delivers next, up to `max_len` bytes,
    /// suspending if nothing is ready. Returns the byte count (≥ 1).
    pub async fn recv_some(&mut self, max_len: usize) -> Result<usize, IoError> {
        match self.issue_read(max_len)? {
            Outcome::Immediate(n) => Ok(n),
            Outcome::Pending => self.await_read().await,
        }
    }

    /// Sends a `Hello` probe and waits for the loader's reply.
    ///
    /// Returns the reply byte count; the bytes themselves are available
    /// via [`Connection::last_read`]. The wait has no timeout; a hang
    /// here is itself the diagnostic for an unresponsive target.
    pub async fn hello(&mut self) -> Result<usize, IoError> {
        self.send_all(&Header::hello().encode()).await?;
        self.recv_some(REPLY_MAX).await
    }

    /// Cancels any outstanding operations without completing them.
    ///
    /// A subsequent await in either direction fails with
    /// [`IoError::NotPending`] rather than resolving against stale state.
    pub fn cancel_pending(&mut self) {
        if self.read_pending() || self.write_pending() {
            trace!("cancelling outstanding operations");
        }
        self.read_lane = ReadLane::Idle;
        self.write_lane = WriteLane::Idle;
    }

    /// Tears the connection down: cancels outstanding operations, then
    /// shuts the write side down and releases the handle.
    ///
    /// Dropping a `Connection` performs the same teardown without the
    /// graceful write-side shutdown.
    pub async fn close(mut self) -> Result<(), IoError> {
        self.cancel_pending();
        self.writer.shutdown().await.map_err(IoError::from_io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exolink_proto::HEADER_LEN;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn small_write_completes_inline() {
        let (local, _remote) = tokio::io::duplex(64);
        let mut conn = Connection::new(local);
        match conn.issue_write(b"ExOs").unwrap() {
            Outcome::Immediate(4) => {}
            other => panic!("expected Immediate(4), got {other:?}"),
        }
        assert!(!conn.write_pending());
    }

    #[tokio::test]
    async fn pending_read_completes_on_await() {
        let (local, mut remote) = tokio::io::duplex(64);
        let mut conn = Connection::new(local);

        assert_eq!(conn.issue_read(16).unwrap(), Outcome::Pending);
        assert!(conn.read_pending());

        tokio::spawn(async move {
            remote.write_all(b"pong").await.unwrap();
            // Keep the far end open until the reader is done with it.
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        });

        assert_eq!(conn.await_read().await.unwrap(), 4);
        assert_eq!(conn.last_read(), b"pong");
        assert!(!conn.read_pending());
    }

    #[tokio::test]
    async fn await_without_issue_fails_fast() {
        let (local, _remote) = tokio::io::duplex(64);
        let mut conn = Connection::new(local);
        assert!(matches!(
            conn.await_read().await,
            Err(IoError::NotPending(Direction::Read))
        ));
        assert!(matches!(
            conn.await_write().await,
            Err(IoError::NotPending(Direction::Write))
        ));
    }

    #[tokio::test]
    async fn double_issue_rejected_per_direction() {
        let (local, _remote) = tokio::io::duplex(2);
        let mut conn = Connection::new(local);

        assert_eq!(conn.issue_read(8).unwrap(), Outcome::Pending);
        assert!(matches!(
            conn.issue_read(8),
            Err(IoError::DoubleIssue(Direction::Read))
        ));

        // Fill the 2-byte pipe so the second write cannot complete inline.
        assert_eq!(conn.issue_write(b"xx").unwrap(), Outcome::Immediate(2));
        assert_eq!(conn.issue_write(b"yy").unwrap(), Outcome::Pending);
        assert!(matches!(
            conn.issue_write(b"zz"),
            Err(IoError::DoubleIssue(Direction::Write))
        ));

        // Duplex invariant: one of each direction coexists fine.
        assert!(conn.read_pending() && conn.write_pending());
    }

    #[tokio::test]
    async fn cancelled_read_never_delivers_stale_data() {
        let (local, mut remote) = tokio::io::duplex(64);
        let mut conn = Connection::new(local);

        assert_eq!(conn.issue_read(16).unwrap(), Outcome::Pending);
        conn.cancel_pending();

        // Data arriving after the cancel must not satisfy a later await.
        remote.write_all(b"stale").await.unwrap();
        assert!(matches!(
            conn.await_read().await,
            Err(IoError::NotPending(Direction::Read))
        ));
        assert!(conn.last_read().is_empty());
    }

    #[tokio::test]
    async fn closed_stream_aborts_read() {
        let (local, remote) = tokio::io::duplex(64);
        let mut conn = Connection::new(local);
        drop(remote);
        assert!(matches!(conn.issue_read(16), Err(IoError::Aborted)));
    }

    #[tokio::test]
    async fn send_all_survives_partial_writes() {
        // 4-byte capacity: every issue accepts at most 4 bytes.
        let (local, mut remote) = tokio::io::duplex(4);
        let mut conn = Connection::new(local);

        let payload: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        let expect = payload.clone();

        let drain = tokio::spawn(async move {
            let mut got = Vec::new();
            let mut chunk = [0u8; 64];
            while got.len() < 1024 {
                let n = remote.read(&mut chunk).await.unwrap();
                assert!(n > 0, "stream closed early");
                got.extend_from_slice(&chunk[..n]);
            }
            got
        });

        conn.send_all(&payload).await.unwrap();
        assert_eq!(drain.await.unwrap(), expect);
        assert!(!conn.write_pending());
    }

    #[tokio::test]
    async fn hello_round_trip() {
        let (local, mut remote) = tokio::io::duplex(64);
        let mut conn = Connection::new(local);

        let loader = tokio::spawn(async move {
            let mut hdr = [0u8; HEADER_LEN];
            remote.read_exact(&mut hdr).await.unwrap();
            let header = Header::decode(&hdr).unwrap();
            assert_eq!(header, Header::hello());
            remote.write_all(&[0x06]).await.unwrap();
            // Hold the stream open until the host has read the ack.
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        });

        assert_eq!(conn.hello().await.unwrap(), 1);
        assert_eq!(conn.last_read(), [0x06]);
        loader.await.unwrap();
    }
}
