//! Memory quantities as carried on the wire.
//!
//! Requests serialize memory as the big-endian two's-complement bytes of an
//! arbitrary-precision integer. The core works on `i64`; anything wider is
//! rejected at decode time, and sums that wrap are reported as overflow
//! rather than silently truncated.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("quantity is not representable in 64 bits")]
    NotRepresentable,
    #[error("quantity sum overflows")]
    Overflow,
}

/// A byte quantity decoded from its wire form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct MemoryQuantity(i64);

impl MemoryQuantity {
    pub const ZERO: Self = Self(0);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Decodes a big-endian two's-complement integer. The empty string is
    /// zero. Values wider than 64 bits fail even when sign-extension bytes
    /// pad them.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, QuantityError> {
        if raw.is_empty() {
            return Ok(Self::ZERO);
        }
        let negative = raw[0] & 0x80 != 0;
        let fill: u8 = if negative { 0xff } else { 0x00 };

        // Strip redundant sign-extension bytes.
        let mut start = 0;
        while start < raw.len() - 1
            && raw[start] == fill
            && (raw[start + 1] & 0x80 != 0) == negative
        {
            start += 1;
        }
        let digits = &raw[start..];
        if digits.len() > 8 {
            return Err(QuantityError::NotRepresentable);
        }

        let mut buf = [fill; 8];
        buf[8 - digits.len()..].copy_from_slice(digits);
        Ok(Self(i64::from_be_bytes(buf)))
    }

    /// Minimal big-endian two's-complement encoding.
    pub fn to_bytes(self) -> Vec<u8> {
        let bytes = self.0.to_be_bytes();
        let negative = self.0 < 0;
        let fill: u8 = if negative { 0xff } else { 0x00 };
        let mut start = 0;
        while start < bytes.len() - 1
            && bytes[start] == fill
            && (bytes[start + 1] & 0x80 != 0) == negative
        {
            start += 1;
        }
        bytes[start..].to_vec()
    }

    pub fn value(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Addition with wrap detection; a sum that leaves `i64` is an overflow.
    pub fn checked_add(self, other: Self) -> Result<Self, QuantityError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(QuantityError::Overflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero() {
        assert_eq!(MemoryQuantity::from_bytes(&[]).unwrap(), MemoryQuantity::ZERO);
    }

    #[test]
    fn round_trips_small_values() {
        for value in [0i64, 1, 127, 128, 255, 256, -1, -128, -129, i64::MAX, i64::MIN] {
            let q = MemoryQuantity::new(value);
            let decoded = MemoryQuantity::from_bytes(&q.to_bytes()).unwrap();
            assert_eq!(decoded.value(), value, "value {value}");
        }
    }

    #[test]
    fn positive_values_keep_a_leading_zero_when_needed() {
        // 128 must encode as [0x00, 0x80], not [0x80] (which is -128).
        assert_eq!(MemoryQuantity::new(128).to_bytes(), vec![0x00, 0x80]);
        assert_eq!(
            MemoryQuantity::from_bytes(&[0x80]).unwrap().value(),
            -128
        );
    }

    #[test]
    fn accepts_padded_sign_extension() {
        let padded = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2a];
        assert_eq!(MemoryQuantity::from_bytes(&padded).unwrap().value(), 42);
        let negative = [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe];
        assert_eq!(MemoryQuantity::from_bytes(&negative).unwrap().value(), -2);
    }

    #[test]
    fn rejects_wider_than_64_bits() {
        let wide = [0x01, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            MemoryQuantity::from_bytes(&wide),
            Err(QuantityError::NotRepresentable)
        );
    }

    #[test]
    fn checked_add_reports_wrap() {
        let max = MemoryQuantity::new(i64::MAX);
        assert_eq!(
            max.checked_add(MemoryQuantity::new(1)),
            Err(QuantityError::Overflow)
        );
        assert_eq!(
            MemoryQuantity::new(40)
                .checked_add(MemoryQuantity::new(2))
                .unwrap()
                .value(),
            42
        );
    }
}
