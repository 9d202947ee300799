//! Packed epoch codec.
//!
//! The chain packs an epoch into one word: number in bits 0..24, index in bits 24..40
//! and length in bits 40..56.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::error::*;

const NUMBER_BITS: u32 = 24;
const INDEX_OFFSET: u32 = 24;
const LENGTH_OFFSET: u32 = 40;
const FIELD_MASK_16: u64 = 0xffff;
const NUMBER_MASK: u64 = (1 << NUMBER_BITS) - 1;
const USED_BITS_MASK: u64 = (1 << 56) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EpochInfo {
    pub number: u64,
    pub index: u64,
    pub length: u64,
}

impl EpochInfo {
    pub fn new(number: u64, index: u64, length: u64) -> Self {
        Self {
            number,
            index,
            length,
        }
    }

    /// Accepts the packed word as `0x` hex or as its decimal rendering.
    pub fn decode(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let packed = match trimmed.strip_prefix("0x") {
            Some(hex_digits) => u64::from_str_radix(hex_digits, 16),
            None => trimmed.parse::<u64>(),
        }
        .map_err(|e| {
            InvalidEpoch {
                raw,
                reason: e.to_string(),
            }
            .build()
        })?;
        ensure!(
            packed & !USED_BITS_MASK == 0,
            InvalidEpoch {
                raw,
                reason: "bits above 56 are set",
            }
        );
        Ok(Self::from_packed(packed))
    }

    pub fn from_packed(packed: u64) -> Self {
        Self {
            number: packed & NUMBER_MASK,
            index: (packed >> INDEX_OFFSET) & FIELD_MASK_16,
            length: (packed >> LENGTH_OFFSET) & FIELD_MASK_16,
        }
    }

    /// Packs the fields back into one word. Fields wider than their slot are rejected.
    pub fn encode(&self) -> Result<u64> {
        ensure!(
            self.number <= NUMBER_MASK && self.index <= FIELD_MASK_16 && self.length <= FIELD_MASK_16,
            InvalidEpoch {
                raw: format!("{self:?}"),
                reason: "field does not fit in its bit range",
            }
        );
        Ok(self.number | (self.index << INDEX_OFFSET) | (self.length << LENGTH_OFFSET))
    }

    pub fn to_hex(&self) -> Result<String> {
        Ok(format!("{:#x}", self.encode()?))
    }

    /// Fractional position for display only; interval arithmetic stays in integers.
    pub fn value(&self) -> f64 {
        if self.length == 0 {
            self.number as f64
        } else {
            self.number as f64 + self.index as f64 / self.length as f64
        }
    }

    /// Compares the fractional part (`index / length`) against another epoch without
    /// floating point. A zero length counts as fraction 0.
    pub fn cmp_fraction(&self, other: &EpochInfo) -> Ordering {
        let lhs = if self.length == 0 {
            0
        } else {
            self.index as u128 * other.length.max(1) as u128
        };
        let rhs = if other.length == 0 {
            0
        } else {
            other.index as u128 * self.length.max(1) as u128
        };
        lhs.cmp(&rhs)
    }
}

impl FromStr for EpochInfo {
    type Err = NeuronCoreError;

    fn from_str(s: &str) -> Result<Self> {
        EpochInfo::decode(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_hex_and_decimal_renderings() {
        let epoch = EpochInfo::new(1979, 633, 1800);
        let packed = epoch.encode().unwrap();
        assert_eq!(EpochInfo::decode(&format!("{packed:#x}")).unwrap(), epoch);
        assert_eq!(EpochInfo::decode(&packed.to_string()).unwrap(), epoch);
    }

    #[test]
    fn decodes_known_chain_epoch() {
        // 0x7080291000032: length 1800, index 657, number 50
        let epoch = EpochInfo::decode("0x7080291000032").unwrap();
        assert_eq!(epoch, EpochInfo::new(50, 657, 1800));
    }

    #[test]
    fn round_trip_over_field_ranges() {
        for number in [0u64, 1, 779, 1 << 23, NUMBER_MASK] {
            for (index, length) in [(0u64, 0u64), (0, 1), (5, 10), (1799, 1800), (0xfffe, 0xffff)] {
                let epoch = EpochInfo::new(number, index, length);
                let decoded = EpochInfo::from_packed(epoch.encode().unwrap());
                assert_eq!(decoded, epoch);
            }
        }
    }

    #[test]
    fn zero_length_value_is_number() {
        let epoch = EpochInfo::new(42, 7, 0);
        assert_eq!(epoch.value(), 42.0);
        assert_eq!(EpochInfo::new(42, 900, 1800).value(), 42.5);
    }

    #[test]
    fn rejects_garbage_and_overflow() {
        assert!(EpochInfo::decode("0xzz").is_err());
        assert!(EpochInfo::decode("epoch").is_err());
        assert!(EpochInfo::decode("0x100000000000000").is_err());
        assert!(EpochInfo::new(1 << 24, 0, 0).encode().is_err());
    }

    #[test]
    fn fraction_comparison_uses_cross_multiplication() {
        let half = EpochInfo::new(1, 900, 1800);
        let third = EpochInfo::new(9, 1, 3);
        assert_eq!(half.cmp_fraction(&third), Ordering::Greater);
        assert_eq!(third.cmp_fraction(&half), Ordering::Less);
        assert_eq!(
            EpochInfo::new(0, 1, 2).cmp_fraction(&EpochInfo::new(0, 2, 4)),
            Ordering::Equal
        );
        assert_eq!(
            EpochInfo::new(0, 5, 0).cmp_fraction(&EpochInfo::new(0, 0, 10)),
            Ordering::Equal
        );
    }
}
