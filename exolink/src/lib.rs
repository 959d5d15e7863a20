//! Asynchronous duplex debug link for pushing boot images to a
//! bootstrap loader.
//!
//! `exolink` drives the host side of a point-to-point bring-up
//! transport: it opens a named endpoint (retrying while the target is
//! still coming up), pushes an `UploadBegin` header and a page-aligned
//! image through a completion-tracked duplex stream, and reads back the
//! loader's acknowledgement bytes.
//!
//! # Quick start
//!
//! ```no_run
//! use exolink::{Image, UnixEndpoint, UploadSession};
//!
//! # async fn push() -> Result<(), Box<dyn std::error::Error>> {
//! let image = Image::new(std::fs::read("boot.img")?)?;
//! let mut session = UploadSession::new(UnixEndpoint, "/run/exos-dbg.sock", image);
//! let reply_bytes = session.run().await?;
//! println!("loader replied with {reply_bytes} byte(s)");
//! # Ok(())
//! # }
//! ```
//!
//! One connection serves one session; there is no multi-client serving,
//! no authentication, and no encryption. This is a debug link for a
//! single trusted target.

mod connect;
mod connection;
mod endpoint;
mod error;
mod session;

pub use exolink_proto::{Command, Header, Image, ImageError, ProtocolError};

pub use connect::{ConnectOptions, connect};
pub use connection::{Connection, Outcome, REPLY_MAX};
pub use endpoint::{Endpoint, OpenError, UnixEndpoint};
pub use error::{ConnectError, Direction, FailureReason, IoError, SessionError};
pub use session::{SessionState, UploadSession};
