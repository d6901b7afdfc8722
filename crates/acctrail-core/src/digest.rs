//! Content fingerprints derived from a record payload.

use sha2::{Digest, Sha256};

/// Number of payload bytes that identify a record's logical type.
pub const DISCRIMINATOR_LEN: usize = 8;

/// Lowercase hex SHA-256 of `data`. Two payloads are the same content iff
/// their hashes are equal.
pub fn content_hash(data: &[u8]) -> String { hex::encode(Sha256::digest(data)) }

/// Hex encoding of the first [`DISCRIMINATOR_LEN`] bytes, or `None` for a
/// shorter payload.
pub fn discriminator(data: &[u8]) -> Option<String> {
  data.get(..DISCRIMINATOR_LEN).map(hex::encode)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hash_of_empty_payload() {
    assert_eq!(
      content_hash(b""),
      "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
  }

  #[test]
  fn hash_distinguishes_content() {
    assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
    assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
  }

  #[test]
  fn discriminator_needs_eight_bytes() {
    assert_eq!(discriminator(&[1, 2, 3, 4, 5, 6, 7]), None);
    assert_eq!(
      discriminator(&[0xde, 0xad, 0xbe, 0xef, 0, 1, 2, 3, 99, 100]).as_deref(),
      Some("deadbeef00010203")
    );
  }
}
