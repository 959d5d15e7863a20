//! Fixed-layout header encoding and decoding.
//!
//! Layout (all multi-byte integers little-endian):
//!
//! ```text
//! +-------------+-------------+-------------+
//! | signature   | command id  | meta        |
//! | "ExOs"      | u16         | u16         |
//! +-------------+-------------+-------------+
//!   4 bytes       2 bytes       2 bytes
//! ```
//!
//! `meta` is command-specific: for [`Command::UploadBegin`] it is the page
//! count of the payload that follows; for [`Command::Hello`] it is zero.

use serde::{Deserialize, Serialize};

use crate::image::Image;

/// Magic signature opening every header.
pub const SIGNATURE: [u8; 4] = *b"ExOs";

/// Total header size on the wire, in bytes.
pub const HEADER_LEN: usize = 8;

/// Payload unit size: images are sized and announced in 4 KiB pages.
pub const PAGE_SIZE: usize = 4096;

/// Command identifier carried in a [`Header`].
///
/// The command set is closed and versionless; an id outside this set is a
/// protocol violation on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Liveness probe. No payload; the loader answers with its ack bytes.
    Hello,
    /// Announces a page-aligned image payload of `meta` pages.
    UploadBegin,
}

impl From<Command> for u16 {
    fn from(command: Command) -> Self {
        match command {
            Command::Hello => 0,
            Command::UploadBegin => 1,
        }
    }
}

impl TryFrom<u16> for Command {
    type Error = ProtocolError;

    fn try_from(id: u16) -> Result<Self, ProtocolError> {
        match id {
            0 => Ok(Self::Hello),
            1 => Ok(Self::UploadBegin),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

/// Decoded form of the 8-byte wire header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Header {
    /// What the sender is about to do.
    pub command: Command,
    /// Command-specific metadata (page count for `UploadBegin`).
    pub meta: u16,
}

impl Header {
    /// Builds a header for an arbitrary command/meta pair.
    pub const fn new(command: Command, meta: u16) -> Self {
        Self { command, meta }
    }

    /// Builds a `Hello` probe header.
    pub const fn hello() -> Self {
        Self::new(Command::Hello, 0)
    }

    /// Builds an `UploadBegin` header announcing `image`.
    ///
    /// The page count comes from the image itself, so header and payload
    /// cannot disagree.
    pub fn upload_begin(image: &Image) -> Self {
        Self::new(Command::UploadBegin, image.page_count())
    }

    /// Encodes the fixed 8-byte wire layout.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&SIGNATURE);
        out[4..6].copy_from_slice(&u16::from(self.command).to_le_bytes());
        out[6..8].copy_from_slice(&self.meta.to_le_bytes());
        out
    }

    /// Decodes a header from the first [`HEADER_LEN`] bytes of `bytes`.
    ///
    /// The signature must match exactly; a mismatch is never tolerated,
    /// because a misaligned stream at this layer means the loader and the
    /// host have already lost sync.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::Truncated { len: bytes.len() });
        }
        let found = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if found != SIGNATURE {
            return Err(ProtocolError::BadSignature { found });
        }
        let id = u16::from_le_bytes([bytes[4], bytes[5]]);
        let meta = u16::from_le_bytes([bytes[6], bytes[7]]);
        Ok(Self::new(Command::try_from(id)?, meta))
    }
}

/// Violations of the wire format.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The first four bytes were not the `"ExOs"` signature.
    #[error("bad signature {found:02x?}, expected {SIGNATURE:02x?}")]
    BadSignature {
        /// The four bytes actually seen.
        found: [u8; 4],
    },

    /// Fewer than [`HEADER_LEN`] bytes were available.
    #[error("truncated header: {len} of {HEADER_LEN} bytes")]
    Truncated {
        /// How many bytes were available.
        len: usize,
    },

    /// The command id is outside the closed command set.
    #[error("unknown command id {0}")]
    UnknownCommand(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_begin_round_trips() {
        let image = Image::test_pattern(3).unwrap();
        let header = Header::upload_begin(&image);
        let decoded = Header::decode(&header.encode()).unwrap();
        assert_eq!(decoded.command, Command::UploadBegin);
        assert_eq!(decoded.meta, 3);
    }

    #[test]
    fn hello_round_trips() {
        let decoded = Header::decode(&Header::hello().encode()).unwrap();
        assert_eq!(decoded, Header::new(Command::Hello, 0));
    }

    #[test]
    fn two_page_upload_has_exact_wire_bytes() {
        let image = Image::test_pattern(2).unwrap();
        let bytes = Header::upload_begin(&image).encode();
        assert_eq!(bytes, [0x45, 0x78, 0x4F, 0x73, 0x01, 0x00, 0x02, 0x00]);
    }

    #[test]
    fn bad_signature_always_rejected() {
        // Anything after the signature is irrelevant once the magic fails.
        let mut bytes = Header::hello().encode();
        bytes[0] = b'e';
        match Header::decode(&bytes) {
            Err(ProtocolError::BadSignature { found }) => {
                assert_eq!(found, [b'e', b'x', b'O', b's']);
            }
            other => panic!("expected BadSignature, got {other:?}"),
        }

        let garbage = [0xFFu8; HEADER_LEN];
        assert!(matches!(
            Header::decode(&garbage),
            Err(ProtocolError::BadSignature { .. })
        ));
    }

    #[test]
    fn short_buffer_is_truncated() {
        let bytes = Header::hello().encode();
        assert!(matches!(
            Header::decode(&bytes[..5]),
            Err(ProtocolError::Truncated { len: 5 })
        ));
        assert!(matches!(
            Header::decode(&[]),
            Err(ProtocolError::Truncated { len: 0 })
        ));
    }

    #[test]
    fn unknown_command_rejected() {
        let mut bytes = Header::hello().encode();
        bytes[4] = 0x07;
        assert!(matches!(
            Header::decode(&bytes),
            Err(ProtocolError::UnknownCommand(7))
        ));
    }
}
