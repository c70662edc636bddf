//! Tree induction over a bootstrap subset
//!
//! Nodes are grown breadth-first from an explicit queue and allocated in
//! sibling pairs, so the right child is always `left + 1`. Splits are chosen
//! by impurity reduction (entropy or Gini) over a random feature subset,
//! trying every 2-bit code as the threshold. `max_depth` counts levels, so a
//! root-only tree has depth 1.

use crate::deterministic::LcgRng;
use crate::errors::BuildError;
use crate::node::{PackedNode, MAX_FEATURE_ID, MAX_NODES};
use crate::sample::{Sample, MAX_FEATURE_VALUE};
use crate::store::SampleMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::trace;

const CODES: usize = MAX_FEATURE_VALUE as usize + 1;

/// Node impurity measure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impurity {
    #[default]
    Entropy,
    Gini,
}

impl Impurity {
    pub fn of(self, counts: &[u32]) -> f64 {
        match self {
            Impurity::Entropy => entropy(counts),
            Impurity::Gini => gini(counts),
        }
    }

    /// Reduction of this impurity when `parent` splits into `left` and `right`
    pub fn gain(self, parent: &[u32], left: &[u32], right: &[u32]) -> f64 {
        let n: u32 = parent.iter().sum();
        if n == 0 {
            return 0.0;
        }
        let nl: u32 = left.iter().sum();
        let nr: u32 = right.iter().sum();
        let weighted = (nl as f64 * self.of(left) + nr as f64 * self.of(right)) / n as f64;
        (self.of(parent) - weighted).max(0.0)
    }
}

/// Induction parameters for one tree
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InductionParams {
    pub min_split: u16,
    /// Levels including the root; 0 and 1 both give a single leaf
    pub max_depth: u16,
    /// Splits gaining no more than this become leaves
    pub impurity_threshold: f32,
    pub num_features: u16,
    pub impurity: Impurity,
}

/// Shannon entropy (log2) of a label histogram
pub fn entropy(counts: &[u32]) -> f64 {
    let total: u32 = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// Gini impurity `1 - sum(p^2)` of a label histogram
pub fn gini(counts: &[u32]) -> f64 {
    let total: u32 = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            p * p
        })
        .sum::<f64>()
}

/// Entropy reduction of splitting `parent` into `left` and `right`
pub fn information_gain(parent: &[u32], left: &[u32], right: &[u32]) -> f64 {
    Impurity::Entropy.gain(parent, left, right)
}

/// Candidate features tried per node: `max(1, round(sqrt(n)))`
pub fn candidate_count(num_features: u16) -> usize {
    ((num_features as f64).sqrt().round() as usize).max(1)
}

/// Most frequent label; ties go to the label seen first
pub fn majority_label<'a>(samples: impl IntoIterator<Item = &'a Sample>) -> u8 {
    let mut counts = [0u32; 256];
    let mut order = Vec::new();
    for sample in samples {
        let slot = &mut counts[sample.label as usize];
        if *slot == 0 {
            order.push(sample.label);
        }
        *slot += 1;
    }
    let mut best = (0u8, 0u32);
    for label in order {
        if counts[label as usize] > best.1 {
            best = (label, counts[label as usize]);
        }
    }
    best.0
}

struct Pending {
    slot: usize,
    rows: Vec<u32>,
    depth_left: u16,
    /// Parent's majority, used when this partition is empty
    fallback: u8,
}

#[derive(Debug, Clone, Copy)]
struct Split {
    feature: usize,
    threshold: u8,
    gain: f64,
}

/// Builds one tree per call
pub struct TreeBuilder<'a> {
    rows: Vec<&'a Sample>,
    params: InductionParams,
    label_space: usize,
    rng: LcgRng,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(samples: &'a SampleMap, params: InductionParams, rng: LcgRng) -> Self {
        let rows: Vec<&Sample> = samples.values().collect();
        let label_space = rows.iter().map(|s| s.label as usize + 1).max().unwrap_or(1);
        Self {
            rows,
            params,
            label_space,
            rng,
        }
    }

    /// Grow the tree; `queue_hint` pre-sizes the work queue
    pub fn build(mut self, queue_hint: usize) -> Result<Vec<PackedNode>, BuildError> {
        if self.rows.is_empty() {
            return Err(BuildError::NoSamples);
        }
        let all: Vec<u32> = (0..self.rows.len() as u32).collect();
        let root_majority = majority_label(all.iter().map(|&r| self.rows[r as usize]));

        let mut nodes = vec![PackedNode::default()];
        let mut queue = VecDeque::with_capacity(queue_hint.max(1));
        queue.push_back(Pending {
            slot: 0,
            rows: all,
            depth_left: self.params.max_depth.saturating_sub(1),
            fallback: root_majority,
        });

        while let Some(pending) = queue.pop_front() {
            if pending.rows.is_empty() {
                nodes[pending.slot] = PackedNode::leaf(pending.fallback);
                continue;
            }
            let counts = self.label_counts(&pending.rows);
            let majority = majority_label(pending.rows.iter().map(|&r| self.rows[r as usize]));

            if counts.iter().filter(|&&c| c > 0).count() == 1
                || pending.rows.len() < self.params.min_split as usize
                || pending.depth_left == 0
            {
                nodes[pending.slot] = PackedNode::leaf(majority);
                continue;
            }

            let split = match self.best_split(&pending.rows, &counts) {
                Some(split) if split.gain > self.params.impurity_threshold as f64 => split,
                _ => {
                    nodes[pending.slot] = PackedNode::leaf(majority);
                    continue;
                }
            };

            let left = nodes.len();
            if left + 2 > MAX_NODES {
                return Err(BuildError::NodeCapacity { limit: MAX_NODES });
            }
            if split.feature > MAX_FEATURE_ID as usize {
                return Err(BuildError::FeatureOutOfRange(split.feature));
            }
            nodes[pending.slot] = PackedNode::split(split.feature as u16, split.threshold, left as u16)
                .ok_or(BuildError::NodeCapacity { limit: MAX_NODES })?;
            nodes.push(PackedNode::default());
            nodes.push(PackedNode::default());

            let (lo, hi): (Vec<u32>, Vec<u32>) = pending
                .rows
                .iter()
                .partition(|&&r| self.value(r, split.feature) <= split.threshold);
            trace!(
                slot = pending.slot,
                feature = split.feature,
                threshold = split.threshold,
                gain = split.gain,
                left = lo.len(),
                right = hi.len(),
                "split"
            );
            for (offset, rows) in [lo, hi].into_iter().enumerate() {
                queue.push_back(Pending {
                    slot: left + offset,
                    rows,
                    depth_left: pending.depth_left - 1,
                    fallback: majority,
                });
            }
        }
        Ok(nodes)
    }

    fn value(&self, row: u32, feature: usize) -> u8 {
        self.rows[row as usize].feature(feature).unwrap_or(0)
    }

    fn label_counts(&self, rows: &[u32]) -> Vec<u32> {
        let mut counts = vec![0u32; self.label_space];
        for &r in rows {
            counts[self.rows[r as usize].label as usize] += 1;
        }
        counts
    }

    fn best_split(&mut self, rows: &[u32], parent: &[u32]) -> Option<Split> {
        let n = self.params.num_features as usize;
        let features = self.rng.choose_distinct(n, candidate_count(self.params.num_features));

        let mut best: Option<Split> = None;
        for feature in features {
            // label histogram per feature code
            let mut by_code = vec![vec![0u32; self.label_space]; CODES];
            for &r in rows {
                let sample = self.rows[r as usize];
                by_code[self.value(r, feature) as usize][sample.label as usize] += 1;
            }

            let mut left = vec![0u32; self.label_space];
            for threshold in 0..CODES {
                for (acc, c) in left.iter_mut().zip(&by_code[threshold]) {
                    *acc += c;
                }
                let right: Vec<u32> = parent.iter().zip(&left).map(|(p, l)| p - l).collect();
                let gain = self.params.impurity.gain(parent, &left, &right);
                if best.map_or(true, |b| gain > b.gain) {
                    best = Some(Split {
                        feature,
                        threshold: threshold as u8,
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// Induce a tree from `samples`
pub fn build_tree(
    samples: &SampleMap,
    params: InductionParams,
    rng: LcgRng,
    queue_hint: usize,
) -> Result<Vec<PackedNode>, BuildError> {
    TreeBuilder::new(samples, params, rng).build(queue_hint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::PackedTree;
    use proptest::prelude::*;

    fn map(rows: &[(u8, &[u8])]) -> SampleMap {
        rows.iter()
            .enumerate()
            .map(|(i, (label, values))| (i as u16, Sample::from_values(*label, values).unwrap()))
            .collect()
    }

    fn params(min_split: u16, max_depth: u16, num_features: u16) -> InductionParams {
        InductionParams {
            min_split,
            max_depth,
            impurity_threshold: 0.01,
            num_features,
            impurity: Impurity::Entropy,
        }
    }

    #[test]
    fn test_entropy_values() {
        assert_eq!(entropy(&[7]), 0.0);
        assert_eq!(entropy(&[0, 5, 0]), 0.0);
        assert!((entropy(&[3, 3]) - 1.0).abs() < 1e-12);
        assert!((entropy(&[2, 2, 2, 2]) - 2.0).abs() < 1e-12);
        assert_eq!(entropy(&[]), 0.0);
    }

    #[test]
    fn test_candidate_count() {
        assert_eq!(candidate_count(0), 1);
        assert_eq!(candidate_count(2), 1);
        assert_eq!(candidate_count(7), 3);
        assert_eq!(candidate_count(144), 12);
    }

    #[test]
    fn test_majority_tie_goes_to_first_seen() {
        let samples = map(&[(4, &[0]), (2, &[0]), (2, &[0]), (4, &[0])]);
        assert_eq!(majority_label(samples.values()), 4);
    }

    #[test]
    fn test_separates_four_samples() {
        let samples = map(&[(0, &[0, 0]), (0, &[0, 1]), (1, &[3, 3]), (1, &[3, 2])]);
        let nodes = build_tree(&samples, params(2, 3, 2), LcgRng::new(37), 4).unwrap();
        let tree = PackedTree::from_nodes(0, nodes);
        for sample in samples.values() {
            assert_eq!(tree.predict_sample(sample), sample.label);
        }
        assert_eq!(tree.count_nodes(), 3);
    }

    #[test]
    fn test_single_label_is_one_leaf() {
        let samples = map(&[(3, &[0, 1]), (3, &[2, 2])]);
        let nodes = build_tree(&samples, params(2, 5, 2), LcgRng::new(1), 1).unwrap();
        assert_eq!(nodes, vec![PackedNode::leaf(3)]);
    }

    #[test]
    fn test_depth_and_min_split_stop_growth() {
        let samples = map(&[(0, &[0]), (1, &[1]), (0, &[2]), (1, &[3])]);
        let nodes = build_tree(&samples, params(2, 0, 1), LcgRng::new(1), 1).unwrap();
        assert_eq!(nodes, vec![PackedNode::leaf(0)]);

        let nodes = build_tree(&samples, params(5, 8, 1), LcgRng::new(1), 1).unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn test_max_depth_counts_levels() {
        let samples = map(&[(0, &[0, 0]), (0, &[0, 1]), (1, &[3, 3]), (1, &[3, 2])]);
        let nodes = build_tree(&samples, params(2, 1, 2), LcgRng::new(37), 4).unwrap();
        let tree = PackedTree::from_nodes(0, nodes);
        assert_eq!(tree.count_nodes(), 1);
        assert_eq!(tree.depth(), 1);

        let nodes = build_tree(&samples, params(2, 2, 2), LcgRng::new(37), 4).unwrap();
        assert_eq!(PackedTree::from_nodes(0, nodes).depth(), 2);
    }

    #[test]
    fn test_gini_values_and_split() {
        assert_eq!(gini(&[9]), 0.0);
        assert!((gini(&[5, 5]) - 0.5).abs() < 1e-12);
        assert!((gini(&[1, 1, 1, 1]) - 0.75).abs() < 1e-12);
        assert!((Impurity::Gini.gain(&[4, 4], &[4, 0], &[0, 4]) - 0.5).abs() < 1e-12);

        let samples = map(&[(0, &[0, 0]), (0, &[0, 1]), (1, &[3, 3]), (1, &[3, 2])]);
        let mut p = params(2, 3, 2);
        p.impurity = Impurity::Gini;
        let tree = PackedTree::from_nodes(0, build_tree(&samples, p, LcgRng::new(5), 4).unwrap());
        for sample in samples.values() {
            assert_eq!(tree.predict_sample(sample), sample.label);
        }
    }

    #[test]
    fn test_right_child_follows_left() {
        let rows: Vec<(u8, Vec<u8>)> = (0..64u8)
            .map(|i| ((i % 3), vec![i % 4, (i / 4) % 4, (i / 16) % 4]))
            .collect();
        let samples: SampleMap = rows
            .iter()
            .enumerate()
            .map(|(i, (l, v))| (i as u16, Sample::from_values(*l, v).unwrap()))
            .collect();
        let nodes = build_tree(&samples, params(2, 6, 3), LcgRng::new(9), 8).unwrap();
        for node in nodes.iter().filter(|n| !n.is_leaf()) {
            let left = node.left_child() as usize;
            assert!(left + 1 < nodes.len());
        }
    }

    #[test]
    fn test_empty_input_rejected() {
        let samples = SampleMap::new();
        assert!(matches!(
            build_tree(&samples, params(2, 3, 2), LcgRng::new(1), 1),
            Err(BuildError::NoSamples)
        ));
    }

    #[test]
    fn test_capacity_overflow_is_an_error() {
        // 4096 distinct points with distinct labels need far more than 2047 nodes
        let samples: SampleMap = (0..4096u32)
            .map(|i| {
                let values: Vec<u8> = (0..6).map(|k| ((i >> (2 * k)) & 3) as u8).collect();
                (i as u16, Sample::from_values((i % 251) as u8, &values).unwrap())
            })
            .collect();
        let p = InductionParams {
            min_split: 2,
            max_depth: 40,
            impurity_threshold: 0.0,
            num_features: 6,
            impurity: Impurity::Entropy,
        };
        assert!(matches!(
            build_tree(&samples, p, LcgRng::new(3), 64),
            Err(BuildError::NodeCapacity { .. })
        ));
    }

    proptest! {
        #[test]
        fn gain_is_never_negative(
            pairs in prop::collection::vec((0u32..50, 0u32..50), 1..6)
        ) {
            let left: Vec<u32> = pairs.iter().map(|p| p.0).collect();
            let right: Vec<u32> = pairs.iter().map(|p| p.1).collect();
            let parent: Vec<u32> = pairs.iter().map(|p| p.0 + p.1).collect();
            prop_assert!(information_gain(&parent, &left, &right) >= 0.0);
        }

        #[test]
        fn depth_never_exceeds_max_depth(
            max_depth in 0u16..6,
            seed in 0i64..1000,
            gini in any::<bool>(),
        ) {
            let samples: SampleMap = (0..48u16)
                .map(|i| {
                    let values = [(i % 4) as u8, ((i / 4) % 4) as u8, ((i / 16) % 4) as u8];
                    (i, Sample::from_values((i % 3) as u8, &values).unwrap())
                })
                .collect();
            let mut p = params(2, max_depth, 3);
            p.impurity_threshold = 0.0;
            if gini {
                p.impurity = Impurity::Gini;
            }
            let tree = PackedTree::from_nodes(0, build_tree(&samples, p, LcgRng::new(seed), 8).unwrap());
            prop_assert!(tree.depth() <= (max_depth as usize).max(1));
        }

        #[test]
        fn uniform_entropy_is_log2_k(k in 1usize..32, n in 1u32..20) {
            let counts = vec![n; k];
            prop_assert!((entropy(&counts) - (k as f64).log2()).abs() < 1e-9);
        }
    }
}
