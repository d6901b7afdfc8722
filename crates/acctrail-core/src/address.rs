//! Base-58 text form of fixed-length record identifiers.
//!
//! Identifiers arrive from the feed as raw bytes (32 for accounts and owning
//! programs) and are stored and displayed in the canonical base-58 text form.
//! Every leading zero byte becomes one `1`, so fixed-length inputs survive a
//! round trip.

use crate::{Error, Result};

/// Length in bytes of an account or program identifier.
pub const ADDRESS_LEN: usize = 32;

/// Encode `bytes` as base-58 text.
pub fn encode(bytes: &[u8]) -> String { bs58::encode(bytes).into_string() }

/// Decode base-58 text back into bytes, restoring one zero byte for every
/// leading `1`.
pub fn decode(text: &str) -> Result<Vec<u8>> {
  bs58::decode(text).into_vec().map_err(|e| match e {
    bs58::decode::Error::InvalidCharacter { character, .. } => Error::InvalidBase58Char(character),
    bs58::decode::Error::NonAsciiCharacter { index } => {
      let character = text.get(index..).and_then(|rest| rest.chars().next());
      Error::InvalidBase58Char(character.unwrap_or(char::REPLACEMENT_CHARACTER))
    }
    other => Error::InvalidBase58(other.to_string()),
  })
}

/// Decode an identifier and require it to be exactly [`ADDRESS_LEN`] bytes.
pub fn decode_address(text: &str) -> Result<[u8; ADDRESS_LEN]> {
  let bytes = decode(text)?;
  bytes
    .as_slice()
    .try_into()
    .map_err(|_| Error::InvalidAddressLength {
      expected: ADDRESS_LEN,
      actual:   bytes.len(),
    })
}

/// Encode raw identifier bytes, requiring exactly [`ADDRESS_LEN`] bytes.
pub fn encode_address(bytes: &[u8]) -> Result<String> {
  if bytes.len() != ADDRESS_LEN {
    return Err(Error::InvalidAddressLength {
      expected: ADDRESS_LEN,
      actual:   bytes.len(),
    });
  }
  Ok(encode(bytes))
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;

  #[test]
  fn all_zero_address_keeps_its_length() {
    let zero = [0u8; ADDRESS_LEN];
    let text = encode(&zero);
    assert_eq!(text, "1".repeat(ADDRESS_LEN));
    assert_eq!(decode(&text).unwrap(), zero.to_vec());
  }

  #[test]
  fn all_ff_address_round_trips() {
    let max = [0xffu8; ADDRESS_LEN];
    let text = encode(&max);
    assert_eq!(text, "JEKNVnkbo3jma5nREBBJCDoXFVeKkD56V3xKrvRmWxFG");
    assert_eq!(decode_address(&text).unwrap(), max);
  }

  #[test]
  fn known_vectors() {
    assert_eq!(encode(b""), "");
    assert_eq!(encode(b"hello world"), "StV1DL6CwTryKyV");
    assert_eq!(encode(&[0, 0, 1]), "112");
    assert_eq!(decode("StV1DL6CwTryKyV").unwrap(), b"hello world");
    assert_eq!(decode("112").unwrap(), vec![0, 0, 1]);
  }

  #[test]
  fn system_program_is_all_ones() {
    let text = "11111111111111111111111111111111";
    assert_eq!(decode_address(text).unwrap(), [0u8; ADDRESS_LEN]);
  }

  #[test]
  fn rejects_ambiguous_characters() {
    for bad in ["0", "O", "I", "l", "abc+"] {
      assert!(matches!(decode(bad), Err(Error::InvalidBase58Char(_))), "{bad}");
    }
    assert!(matches!(decode("é"), Err(Error::InvalidBase58Char('é'))));
    assert!(matches!(decode("22é2"), Err(Error::InvalidBase58Char('é'))));
  }

  #[test]
  fn wrong_length_is_rejected() {
    assert!(matches!(
      decode_address("2"),
      Err(Error::InvalidAddressLength { expected: 32, actual: 1 })
    ));
    assert!(encode_address(&[1u8; 31]).is_err());
  }

  proptest! {
    #[test]
    fn address_round_trip(bytes in prop::array::uniform32(any::<u8>())) {
      let text = encode(&bytes);
      prop_assert_eq!(decode_address(&text).unwrap(), bytes);
    }

    #[test]
    fn leading_zeros_survive(zeros in 0usize..32, tail in prop::collection::vec(1u8..=255u8, 0..8)) {
      let mut bytes = vec![0u8; zeros];
      bytes.extend(tail);
      prop_assert_eq!(decode(&encode(&bytes)).unwrap(), bytes);
    }
  }
}
