//! Per-tree bootstrap subsets and their out-of-bag complements

use crate::deterministic::{subset_fingerprint, LcgRng};
use crate::errors::StoreError;
use crate::store::{SampleMap, SampleStore};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

/// Redraws allowed when a subset repeats an earlier tree's
const MAX_REDRAWS: usize = 8;

/// In-bag and out-of-bag IDs for one tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeSubset {
    pub in_bag: BTreeSet<u16>,
    pub oob: BTreeSet<u16>,
    /// With-replacement draws taken to reach the distinct target
    pub draws: usize,
}

impl TreeSubset {
    /// Draws that hit an already chosen ID
    pub fn repeats(&self) -> usize {
        self.draws - self.in_bag.len()
    }
}

/// Draws bootstrap subsets, never handing two trees the same one
#[derive(Debug)]
pub struct BootstrapSampler {
    ratio: f32,
    seen: HashSet<[u8; 32]>,
}

impl BootstrapSampler {
    pub fn new(ratio: f32) -> Self {
        Self {
            ratio,
            seen: HashSet::new(),
        }
    }

    /// Distinct in-bag IDs a subset of `n` training samples needs
    pub fn target(&self, n: usize) -> usize {
        ((self.ratio as f64 * n as f64).ceil() as usize).clamp(1.min(n), n)
    }

    /// Draw with replacement until `target` distinct IDs are in the bag
    pub fn draw(&self, train_ids: &[u16], rng: &mut LcgRng) -> TreeSubset {
        let target = self.target(train_ids.len());
        let mut in_bag = BTreeSet::new();
        let mut draws = 0;
        while in_bag.len() < target {
            in_bag.insert(train_ids[rng.next_below(train_ids.len())]);
            draws += 1;
        }
        let oob = train_ids
            .iter()
            .copied()
            .filter(|id| !in_bag.contains(id))
            .collect();
        TreeSubset { in_bag, oob, draws }
    }

    /// Like [`draw`](Self::draw), redrawing when the subset was already used
    pub fn draw_unique(&mut self, train_ids: &[u16], rng: &mut LcgRng) -> TreeSubset {
        let mut subset = self.draw(train_ids, rng);
        for attempt in 1..=MAX_REDRAWS {
            if self.seen.insert(subset_fingerprint(&subset.in_bag)) {
                return subset;
            }
            debug!(attempt, "duplicate bootstrap subset, redrawing");
            subset = self.draw(train_ids, rng);
        }
        warn!("could not find an unused bootstrap subset, accepting a duplicate");
        self.seen.insert(subset_fingerprint(&subset.in_bag));
        subset
    }

    pub fn forget(&mut self) {
        self.seen.clear();
    }
}

/// Fill `store` with the subset's samples, adding replicas under synthetic
/// IDs when requested. Synthetic IDs never collide with the OOB set.
pub fn materialize(
    subset: &TreeSubset,
    train: &SampleMap,
    store: &mut SampleStore,
    with_replicas: bool,
    rng: &mut LcgRng,
) -> Result<(), StoreError> {
    let samples: SampleMap = subset
        .in_bag
        .iter()
        .filter_map(|id| train.get(id).map(|s| (*id, s.clone())))
        .collect();
    store.adopt(samples);

    if with_replicas && subset.repeats() > 0 {
        let target = store.len() + subset.repeats();
        store.bootstrap_data_reserved(target, u16::MAX, &subset.oob, rng)?;
    }
    Ok(())
}
