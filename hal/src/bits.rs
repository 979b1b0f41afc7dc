//! Aligned load/store helpers and width conversions.
//!
//! The interpreter and the PMA lookup both need to reason about access width
//! as a `log2` exponent (0..=3) rather than a byte count, so the two
//! directions are kept as separate small helpers instead of a single
//! bidirectional table.

use thiserror::Error;

/// An access width that is neither 1, 2, 4 nor 8 bytes.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("unsupported access width: {0} bytes")]
pub struct InvalidWidth(pub u64);

/// Converts a byte count (1, 2, 4, 8) to its log2 exponent.
pub const fn size_to_log2(size: u64) -> Result<u32, InvalidWidth> {
    match size {
        1 => Ok(0),
        2 => Ok(1),
        4 => Ok(2),
        8 => Ok(3),
        other => Err(InvalidWidth(other)),
    }
}

/// Converts a log2 exponent (0..=3) back to a byte count.
pub const fn log2_size_to_bytes(log2_size: u32) -> u64 {
    1u64 << log2_size
}

/// Sign-extends a value read from a `width`-byte field up to 64 bits.
///
/// `value` must already be truncated to `width` bytes (high bits clear).
pub const fn sign_extend(value: u64, width: u32) -> i64 {
    let shift = 64 - width * 8;
    ((value << shift) as i64) >> shift
}

/// Zero-extends a value read from a `width`-byte field up to 64 bits.
///
/// Present for symmetry with [`sign_extend`]; on a little-endian load the
/// value is already zero-extended once masked, but callers that build a
/// value incrementally use this to make the intent explicit.
pub const fn zero_extend(value: u64, width: u32) -> u64 {
    if width >= 8 {
        value
    } else {
        value & ((1u64 << (width * 8)) - 1)
    }
}

/// Reads a little-endian word of `size` bytes (1, 2, 4 or 8) out of `bytes`
/// at `offset`. Panics if the slice is too short; callers are expected to
/// have already range-checked via the PMA table.
pub fn read_le(bytes: &[u8], offset: usize, size: u64) -> u64 {
    match size {
        1 => bytes[offset] as u64,
        2 => u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap()) as u64,
        4 => u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as u64,
        8 => u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap()),
        other => panic!("unsupported read width: {other}"),
    }
}

/// Writes `value` as a little-endian word of `size` bytes into `bytes` at
/// `offset`. Panics if the slice is too short; see [`read_le`].
pub fn write_le(bytes: &mut [u8], offset: usize, size: u64, value: u64) {
    match size {
        1 => bytes[offset] = value as u8,
        2 => bytes[offset..offset + 2].copy_from_slice(&(value as u16).to_le_bytes()),
        4 => bytes[offset..offset + 4].copy_from_slice(&(value as u32).to_le_bytes()),
        8 => bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes()),
        other => panic!("unsupported write width: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_log2_round_trip() {
        for (size, log2) in [(1u64, 0u32), (2, 1), (4, 2), (8, 3)] {
            assert_eq!(size_to_log2(size).unwrap(), log2);
            assert_eq!(log2_size_to_bytes(log2), size);
        }
    }

    #[test]
    fn rejects_invalid_width() {
        assert!(size_to_log2(3).is_err());
        assert!(size_to_log2(0).is_err());
    }

    #[test]
    fn sign_extend_negative_byte() {
        assert_eq!(sign_extend(0xff, 1), -1);
        assert_eq!(sign_extend(0x80, 1), -128);
        assert_eq!(sign_extend(0x7f, 1), 127);
    }

    #[test]
    fn sign_extend_word() {
        assert_eq!(sign_extend(0xffff_ffff, 4), -1);
        assert_eq!(sign_extend(0x7fff_ffff, 4), i32::MAX as i64);
    }

    #[test]
    fn zero_extend_masks_high_bits() {
        assert_eq!(zero_extend(0xffff_ffff_ffff_ffff, 1), 0xff);
        assert_eq!(zero_extend(0xffff_ffff_ffff_ffff, 8), u64::MAX);
    }

    #[test]
    fn le_round_trip() {
        let mut buf = [0u8; 16];
        write_le(&mut buf, 4, 8, 0x1122_3344_5566_7788);
        assert_eq!(read_le(&buf, 4, 8), 0x1122_3344_5566_7788);
    }
}
