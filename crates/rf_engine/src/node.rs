//! 4-byte packed tree node
//!
//! | bits  | field          |
//! |-------|----------------|
//! | 0-9   | feature id     |
//! | 10-17 | label          |
//! | 18-19 | threshold      |
//! | 20    | leaf flag      |
//! | 21-31 | left child     |
//!
//! The right child always sits at `left + 1`.

/// Largest node count a tree may hold
pub const MAX_NODES: usize = 2047;
pub const MAX_FEATURE_ID: u16 = 0x3FF;
pub const MAX_CHILD_INDEX: u16 = 0x7FF;
pub const MAX_THRESHOLD: u8 = 3;

const FEATURE_MASK: u32 = 0x3FF;
const LABEL_SHIFT: u32 = 10;
const THRESHOLD_SHIFT: u32 = 18;
const LEAF_BIT: u32 = 1 << 20;
const LEFT_SHIFT: u32 = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct PackedNode(u32);

impl PackedNode {
    /// Pack all fields; `None` when any is out of range
    pub fn new(
        feature_id: u16,
        label: u8,
        threshold: u8,
        is_leaf: bool,
        left_child: u16,
    ) -> Option<Self> {
        if feature_id > MAX_FEATURE_ID || threshold > MAX_THRESHOLD || left_child > MAX_CHILD_INDEX
        {
            return None;
        }
        let mut raw = feature_id as u32 & FEATURE_MASK;
        raw |= (label as u32) << LABEL_SHIFT;
        raw |= (threshold as u32) << THRESHOLD_SHIFT;
        if is_leaf {
            raw |= LEAF_BIT;
        }
        raw |= (left_child as u32) << LEFT_SHIFT;
        Some(Self(raw))
    }

    pub fn leaf(label: u8) -> Self {
        Self(((label as u32) << LABEL_SHIFT) | LEAF_BIT)
    }

    /// Internal node sending `value <= threshold` to `left_child`
    pub fn split(feature_id: u16, threshold: u8, left_child: u16) -> Option<Self> {
        Self::new(feature_id, 0, threshold, false, left_child)
    }

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn feature_id(self) -> u16 {
        (self.0 & FEATURE_MASK) as u16
    }

    pub fn label(self) -> u8 {
        (self.0 >> LABEL_SHIFT) as u8
    }

    pub fn threshold(self) -> u8 {
        ((self.0 >> THRESHOLD_SHIFT) & 0b11) as u8
    }

    pub fn is_leaf(self) -> bool {
        self.0 & LEAF_BIT != 0
    }

    pub fn left_child(self) -> u16 {
        (self.0 >> LEFT_SHIFT) as u16
    }

    pub fn right_child(self) -> u16 {
        self.left_child() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_field_layout() {
        let node = PackedNode::new(5, 2, 3, false, 7).unwrap();
        assert_eq!(node.raw(), 5 | (2 << 10) | (3 << 18) | (7 << 21));
        assert_eq!(node.right_child(), 8);
        assert!(PackedNode::leaf(9).is_leaf());
        assert_eq!(PackedNode::leaf(9).label(), 9);
    }

    #[test]
    fn test_out_of_range_fields() {
        assert!(PackedNode::new(1024, 0, 0, true, 0).is_none());
        assert!(PackedNode::new(0, 0, 4, true, 0).is_none());
        assert!(PackedNode::new(0, 0, 0, true, 2048).is_none());
    }

    #[test]
    fn test_right_child_of_last_slot_fits_u16() {
        let node = PackedNode::split(0, 1, MAX_CHILD_INDEX).unwrap();
        assert_eq!(node.right_child(), 2048);
    }

    proptest! {
        #[test]
        fn packed_node_round_trip(
            feature in 0u16..1024,
            label in any::<u8>(),
            threshold in 0u8..4,
            is_leaf in any::<bool>(),
            left in 0u16..2048,
        ) {
            let node = PackedNode::new(feature, label, threshold, is_leaf, left).unwrap();
            let decoded = PackedNode::from_raw(node.raw());
            prop_assert_eq!(decoded.feature_id(), feature);
            prop_assert_eq!(decoded.label(), label);
            prop_assert_eq!(decoded.threshold(), threshold);
            prop_assert_eq!(decoded.is_leaf(), is_leaf);
            prop_assert_eq!(decoded.left_child(), left);
            prop_assert_eq!(decoded.right_child(), left + 1);
        }
    }
}
