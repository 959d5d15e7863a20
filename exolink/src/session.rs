//! The upload state machine: header send → payload send → reply read.

use std::fmt;

use exolink_proto::{Header, Image};
use tracing::{debug, warn};

use crate::connect::{ConnectOptions, connect};
use crate::connection::REPLY_MAX;
use crate::endpoint::Endpoint;
use crate::error::{FailureReason, SessionError};

/// Where an upload session currently stands.
///
/// Sessions move strictly forward; `Failed` is terminal and reachable
/// from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet started.
    Idle,
    /// Establishing the connection.
    Connecting,
    /// Header fully flushed; payload in progress.
    HeaderSent,
    /// Payload fully flushed; reply read not yet issued.
    PayloadSent,
    /// Reply read outstanding.
    AwaitingReply,
    /// Reply received; the link did its job.
    Complete,
    /// Terminal failure; see the returned [`SessionError`].
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::HeaderSent => "header-sent",
            Self::PayloadSent => "payload-sent",
            Self::AwaitingReply => "awaiting-reply",
            Self::Complete => "complete",
            Self::Failed => "failed",
        })
    }
}

/// A single-shot upload of one [`Image`] over one connection.
///
/// The session owns its endpoint handle and image for its whole
/// lifetime and is never shared: one caller drives it from `Idle` to
/// `Complete` (or `Failed`) exactly once. There is no automatic
/// reconnection or retransmission; the protocol has no sequence numbers
/// and cannot resume mid-stream, so recovery is always a fresh session.
#[derive(Debug)]
pub struct UploadSession<E: Endpoint> {
    /// Endpoint used to open the link.
    endpoint: E,
    /// Endpoint name (for Unix endpoints, a socket path).
    name: String,
    /// Retry policy handed to the establisher.
    options: ConnectOptions,
    /// The image to push.
    image: Image,
    /// Current position in the state machine.
    state: SessionState,
    /// Reply bytes captured on completion.
    reply: Vec<u8>,
}

impl<E: Endpoint> UploadSession<E> {
    /// Creates an idle session for `image` against `name`.
    pub fn new(endpoint: E, name: impl Into<String>, image: Image) -> Self {
        Self {
            endpoint,
            name: name.into(),
            options: ConnectOptions::default(),
            image,
            state: SessionState::Idle,
            reply: Vec::new(),
        }
    }

    /// Replaces the default connection retry policy.
    pub fn with_options(mut self, options: ConnectOptions) -> Self {
        self.options = options;
        self
    }

    /// Current state of the session.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The image this session pushes.
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Reply bytes received from the loader; empty until `Complete`.
    pub fn reply(&self) -> &[u8] {
        &self.reply
    }

    /// Drives the session from `Idle` to `Complete`, returning the reply
    /// byte count.
    ///
    /// Write order is protocol order: the header is fully flushed before
    /// any payload byte, and the payload is fully flushed before the
    /// reply read is issued. The loader parses the stream strictly in
    /// that sequence. The reply wait has no timeout.
    pub async fn run(&mut self) -> Result<usize, SessionError> {
        if self.state != SessionState::Idle {
            return Err(self.fail(FailureReason::Replayed));
        }

        self.state = SessionState::Connecting;
        debug!(name = %self.name, pages = self.image.page_count(), "starting upload");
        let mut conn = match connect(&self.endpoint, &self.name, &self.options).await {
            Ok(conn) => conn,
            Err(e) => return Err(self.fail(e.into())),
        };

        let header = Header::upload_begin(&self.image);
        if let Err(e) = conn.send_all(&header.encode()).await {
            return Err(self.fail(e.into()));
        }
        self.state = SessionState::HeaderSent;
        debug!(meta = header.meta, "header flushed");

        if let Err(e) = conn.send_all(self.image.bytes()).await {
            return Err(self.fail(e.into()));
        }
        self.state = SessionState::PayloadSent;
        debug!(bytes = self.image.len(), "payload flushed");

        self.state = SessionState::AwaitingReply;
        let n = match conn.recv_some(REPLY_MAX).await {
            Ok(n) => n,
            Err(e) => return Err(self.fail(e.into())),
        };
        self.reply = conn.last_read().to_vec();
        self.state = SessionState::Complete;
        debug!(reply_bytes = n, "upload acknowledged");

        // The protocol already completed; a teardown hiccup is worth a
        // log line, not a failed session.
        if let Err(e) = conn.close().await {
            warn!(error = %e, "connection teardown reported an error");
        }
        Ok(n)
    }

    /// Records a terminal failure and builds the error carrying the
    /// phase the session was in when it happened.
    fn fail(&mut self, reason: FailureReason) -> SessionError {
        let phase = self.state;
        self.state = SessionState::Failed;
        SessionError { phase, reason }
    }
}
