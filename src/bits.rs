//! Shaft word bit-order codec.
//!
//! Looms number shafts from the opposite end of the byte than the host does,
//! so a shaft word goes over the wire with its whole bit order reversed:
//!
//! ```text
//! shaft word (bit 0 = shaft 1)   0b0000_0001_0000_0011   (shafts 1, 2, 9)
//! reversed over 16 bits          0b1100_0000_1000_0000
//! wire bytes (little-endian)     [0x80, 0xc0]
//! ```
//!
//! The net effect is big-endian byte order with each byte bit-flipped.

use thiserror::Error;

/// Errors from the bit codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BitsError {
    /// An argument was outside the range the codec accepts.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Largest value representable in `num_bits` bits.
fn max_value(num_bits: u32) -> u64 {
    if num_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << num_bits) - 1
    }
}

/// Reverse the order of the low `num_bits` bits of `bitmask`.
///
/// # Errors
///
/// [`BitsError::InvalidArgument`] if `num_bits` is not in `1..=64` or
/// `bitmask` does not fit in `num_bits` bits.
pub fn reverse_bits(bitmask: u64, num_bits: u32) -> Result<u64, BitsError> {
    if !(1..=64).contains(&num_bits) {
        return Err(BitsError::InvalidArgument(format!(
            "num_bits={num_bits} must be in 1..=64"
        )));
    }
    if bitmask > max_value(num_bits) {
        return Err(BitsError::InvalidArgument(format!(
            "bitmask={bitmask:#x} does not fit in {num_bits} bits"
        )));
    }
    if bitmask == 0 {
        return Ok(0);
    }
    Ok(bitmask.reverse_bits() >> (64 - num_bits))
}

/// Encode a shaft word as `num_bytes` wire bytes.
///
/// # Errors
///
/// [`BitsError::InvalidArgument`] if `num_bytes` is not in `1..=8` or the
/// word does not fit in `num_bytes` bytes.
pub fn shaft_word_to_wire(shaft_word: u64, num_bytes: usize) -> Result<Vec<u8>, BitsError> {
    let num_bits = checked_num_bits(num_bytes)?;
    let reversed = reverse_bits(shaft_word, num_bits)?;
    Ok(reversed.to_le_bytes()[..num_bytes].to_vec())
}

/// Decode `num_bytes` wire bytes back into a shaft word.
///
/// Exact inverse of [`shaft_word_to_wire`].
///
/// # Errors
///
/// [`BitsError::InvalidArgument`] if `bytes.len() != num_bytes` or
/// `num_bytes` is not in `1..=8`.
pub fn wire_to_shaft_word(bytes: &[u8], num_bytes: usize) -> Result<u64, BitsError> {
    let num_bits = checked_num_bits(num_bytes)?;
    if bytes.len() != num_bytes {
        return Err(BitsError::InvalidArgument(format!(
            "expected {num_bytes} bytes, got {}",
            bytes.len()
        )));
    }
    let mut le = [0u8; 8];
    le[..num_bytes].copy_from_slice(bytes);
    reverse_bits(u64::from_le_bytes(le), num_bits)
}

fn checked_num_bits(num_bytes: usize) -> Result<u32, BitsError> {
    if !(1..=8).contains(&num_bytes) {
        return Err(BitsError::InvalidArgument(format!(
            "num_bytes={num_bytes} must be in 1..=8"
        )));
    }
    Ok(num_bytes as u32 * 8)
}

/// Pack a per-shaft up/down vector into a shaft word (bit `i` = shaft `i+1`).
pub fn shaft_word_from_flags(are_shafts_up: &[bool]) -> u64 {
    are_shafts_up
        .iter()
        .take(64)
        .enumerate()
        .filter(|(_, up)| **up)
        .fold(0u64, |word, (i, _)| word | (1u64 << i))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_bits_small_widths() {
        assert_eq!(reverse_bits(0b1, 1).unwrap(), 0b1);
        assert_eq!(reverse_bits(0b01, 2).unwrap(), 0b10);
        assert_eq!(reverse_bits(0b0011, 4).unwrap(), 0b1100);
        assert_eq!(reverse_bits(0b1000_0001, 8).unwrap(), 0b1000_0001);
        assert_eq!(reverse_bits(0b0000_0110, 8).unwrap(), 0b0110_0000);
    }

    #[test]
    fn test_reverse_bits_zero_is_zero_for_all_widths() {
        for num_bits in 1..=64 {
            assert_eq!(reverse_bits(0, num_bits).unwrap(), 0);
        }
    }

    #[test]
    fn test_reverse_bits_is_involution() {
        for num_bits in [3u32, 8, 13, 32, 64] {
            let max = max_value(num_bits);
            for value in [1u64, 5, max / 3, max] {
                let value = value & max;
                let once = reverse_bits(value, num_bits).unwrap();
                assert_eq!(reverse_bits(once, num_bits).unwrap(), value);
            }
        }
    }

    #[test]
    fn test_reverse_bits_rejects_bad_width() {
        assert!(matches!(reverse_bits(0, 0), Err(BitsError::InvalidArgument(_))));
        assert!(matches!(reverse_bits(0, 65), Err(BitsError::InvalidArgument(_))));
    }

    #[test]
    fn test_reverse_bits_rejects_oversized_mask() {
        assert!(reverse_bits(0xff, 8).is_ok());
        assert!(matches!(reverse_bits(0x100, 8), Err(BitsError::InvalidArgument(_))));
        assert!(matches!(reverse_bits(0b100, 2), Err(BitsError::InvalidArgument(_))));
    }

    #[test]
    fn test_shaft_word_to_wire_flips_bits_big_endian() {
        // shafts 1, 2 and 9
        let wire = shaft_word_to_wire(0b0000_0001_0000_0011, 2).unwrap();
        assert_eq!(wire, vec![0x80, 0xc0]);

        // shaft 1 on a 32-shaft loom lands in the top bit of the last byte
        let wire = shaft_word_to_wire(1, 4).unwrap();
        assert_eq!(wire, vec![0x00, 0x00, 0x00, 0x80]);
    }

    #[test]
    fn test_wire_to_shaft_word_inverts_encode() {
        for word in [0u64, 1, 0x8000_0001, 0x1234_5678, 0xffff_ffff] {
            let wire = shaft_word_to_wire(word, 4).unwrap();
            assert_eq!(wire_to_shaft_word(&wire, 4).unwrap(), word);
        }
    }

    #[test]
    fn test_wire_to_shaft_word_rejects_length_mismatch() {
        assert!(wire_to_shaft_word(&[0, 0, 0], 4).is_err());
        assert!(shaft_word_to_wire(0, 0).is_err());
        assert!(shaft_word_to_wire(0, 9).is_err());
    }

    #[test]
    fn test_shaft_word_from_flags() {
        assert_eq!(shaft_word_from_flags(&[]), 0);
        assert_eq!(shaft_word_from_flags(&[true, false, true]), 0b101);
        assert_eq!(shaft_word_from_flags(&[false; 8]), 0);
    }
}
