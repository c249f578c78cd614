//! Content hashing for encoded crops.

use sha2::{Digest, Sha256};

/// Lower-case hex SHA-256 of a record's encoded image bytes.
///
/// Encoding is deterministic, so re-extracting the same page reproduces the
/// hash and storage can skip crops it already holds.
pub fn content_hash(encoded: &[u8]) -> String {
    format!("{:x}", Sha256::digest(encoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma};
    use std::io::Cursor;

    fn encoded_crop(shade: u8) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        GrayImage::from_pixel(12, 8, Luma([shade]))
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_same_crop_same_hash() {
        let first = content_hash(&encoded_crop(0));

        assert_eq!(first, content_hash(&encoded_crop(0)));
        assert_ne!(first, content_hash(&encoded_crop(255)));
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
