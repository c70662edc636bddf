//! Packed training sample
//!
//! Features are pre-quantized into 2-bit codes (0..=3) and packed four per
//! byte, feature `i` at bit offset `(i % 4) * 2` of byte `i / 4`.

/// Largest quantized feature value
pub const MAX_FEATURE_VALUE: u8 = 3;

/// Bytes needed to hold `feature_count` packed features
pub fn packed_len(feature_count: u16) -> usize {
    (feature_count as usize).div_ceil(4)
}

/// One labelled sample with 2-bit packed features
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sample {
    pub label: u8,
    feature_count: u16,
    packed: Vec<u8>,
}

impl Sample {
    /// Pack raw feature codes; returns `None` if any value exceeds 3
    pub fn from_values(label: u8, values: &[u8]) -> Option<Self> {
        let feature_count = u16::try_from(values.len()).ok()?;
        let mut packed = vec![0u8; packed_len(feature_count)];
        for (i, &value) in values.iter().enumerate() {
            if value > MAX_FEATURE_VALUE {
                return None;
            }
            packed[i / 4] |= value << ((i % 4) * 2);
        }
        Some(Self {
            label,
            feature_count,
            packed,
        })
    }

    /// Wrap bytes read from flash
    pub fn from_packed(label: u8, feature_count: u16, packed: Vec<u8>) -> Self {
        debug_assert_eq!(packed.len(), packed_len(feature_count));
        Self {
            label,
            feature_count,
            packed,
        }
    }

    pub fn feature_count(&self) -> u16 {
        self.feature_count
    }

    /// Quantized value of feature `index`, `None` past the sample width
    pub fn feature(&self, index: usize) -> Option<u8> {
        if index >= self.feature_count as usize {
            return None;
        }
        let byte = self.packed.get(index / 4)?;
        Some((byte >> ((index % 4) * 2)) & 0b11)
    }

    pub fn packed(&self) -> &[u8] {
        &self.packed
    }

    pub fn values(&self) -> Vec<u8> {
        (0..self.feature_count as usize)
            .filter_map(|i| self.feature(i))
            .collect()
    }
}
