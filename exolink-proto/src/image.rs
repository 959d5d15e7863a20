//! Boot image payloads.

use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use crate::wire::PAGE_SIZE;

/// An immutable boot image, validated for transmission as an
/// `UploadBegin` payload.
///
/// Construction enforces the wire invariants once, so everything
/// downstream (header encoding, the upload session, the loader side) can
/// rely on the length being a positive multiple of [`PAGE_SIZE`] with a
/// page count that fits the header's 16-bit meta field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Raw image bytes.
    data: Vec<u8>,
}

impl Image {
    /// Wraps `data` as a boot image.
    pub fn new(data: Vec<u8>) -> Result<Self, ImageError> {
        if data.is_empty() {
            return Err(ImageError::Empty);
        }
        if data.len() % PAGE_SIZE != 0 {
            return Err(ImageError::Unaligned { len: data.len() });
        }
        let pages = data.len() / PAGE_SIZE;
        if u16::try_from(pages).is_err() {
            return Err(ImageError::TooLarge { pages });
        }
        Ok(Self { data })
    }

    /// Builds a synthetic bring-up image of `pages` pages, each byte set
    /// to its offset modulo 256.
    ///
    /// This is the pattern pushed at targets that have nothing real to
    /// boot yet; the loader can verify it without a reference copy.
    pub fn test_pattern(pages: u16) -> Result<Self, ImageError> {
        #[allow(clippy::cast_possible_truncation)] // truncation to u8 is the pattern
        let data: Vec<u8> = (0..usize::from(pages) * PAGE_SIZE)
            .map(|i| i as u8)
            .collect();
        Self::new(data)
    }

    /// The raw image bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Image length in bytes. Always a positive multiple of [`PAGE_SIZE`].
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always `false`; present for API completeness.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Number of 4 KiB pages, as announced in the header meta field.
    pub fn page_count(&self) -> u16 {
        #[allow(clippy::cast_possible_truncation)] // bounded by u16 at construction
        let pages = (self.data.len() / PAGE_SIZE) as u16;
        pages
    }

    /// Lowercase hex SHA-256 digest of the image bytes.
    ///
    /// Logged on upload so the operator can match what was pushed against
    /// what the loader reports booting.
    pub fn digest_hex(&self) -> String {
        let digest = Sha256::digest(&self.data);
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

/// Rejections from [`Image::new`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ImageError {
    /// Zero-length images cannot be announced (page count would be 0).
    #[error("image is empty")]
    Empty,

    /// The length is not a multiple of the page size.
    #[error("image length {len} is not a multiple of {PAGE_SIZE}")]
    Unaligned {
        /// Offending length in bytes.
        len: usize,
    },

    /// The page count does not fit the header's 16-bit meta field.
    #[error("image spans {pages} pages, more than a header can announce")]
    TooLarge {
        /// Computed page count.
        pages: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_page_aligned_data() {
        let image = Image::new(vec![0xAA; PAGE_SIZE * 2]).unwrap();
        assert_eq!(image.len(), 8192);
        assert_eq!(image.page_count(), 2);
        assert!(!image.is_empty());
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(Image::new(Vec::new()), Err(ImageError::Empty)));
    }

    #[test]
    fn rejects_unaligned() {
        assert!(matches!(
            Image::new(vec![0; PAGE_SIZE + 1]),
            Err(ImageError::Unaligned { len }) if len == PAGE_SIZE + 1
        ));
    }

    #[test]
    fn test_pattern_wraps_every_page() {
        let image = Image::test_pattern(2).unwrap();
        let bytes = image.bytes();
        assert_eq!(bytes.len(), 8192);
        assert_eq!(bytes[0], 0);
        assert_eq!(bytes[255], 255);
        assert_eq!(bytes[256], 0);
        assert_eq!(bytes[8191], (8191 % 256) as u8);
    }

    #[test]
    fn test_pattern_rejects_zero_pages() {
        assert!(matches!(Image::test_pattern(0), Err(ImageError::Empty)));
    }

    #[test]
    fn digest_is_hex_and_content_sensitive() {
        let a = Image::test_pattern(1).unwrap();
        let b = Image::new(vec![0; PAGE_SIZE]).unwrap();
        assert_eq!(a.digest_hex().len(), 64);
        assert!(a.digest_hex().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a.digest_hex(), b.digest_hex());
        assert_eq!(a.digest_hex(), Image::test_pattern(1).unwrap().digest_hex());
    }
}
