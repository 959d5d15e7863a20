//! Wire protocol for the exolink host↔loader debug link.
//!
//! Every exchange starts with a fixed 8-byte [`Header`]: a 4-byte magic
//! signature, a little-endian command id, and a little-endian metadata
//! field. For [`Command::UploadBegin`] the header is followed by a
//! page-aligned [`Image`] payload; [`Command::Hello`] carries no payload.
//! The layout is position-fixed rather than serialized, because the
//! receiving end is a bootstrap loader that parses the stream with no
//! framing library underneath it.

mod image;
mod wire;

pub use image::{Image, ImageError};
pub use wire::{Command, HEADER_LEN, Header, PAGE_SIZE, ProtocolError, SIGNATURE};
