//! Forest orchestrator
//!
//! Owns every store and tree of one forest and pages them strictly one at a
//! time: a single subset and a single tree are resident while building, a
//! single tree while evaluating.

use crate::bootstrap::{materialize, BootstrapSampler};
use crate::config::RfConfig;
use crate::deterministic::LcgRng;
use crate::errors::{ForestError, Result};
use crate::flash::{FlashFs, SharedFs};
use crate::induction::{build_tree, Impurity, InductionParams};
use crate::metrics::{ConfusionTally, Scores};
use crate::node_predictor::{NodePredictor, NodeSample};
use crate::sample::Sample;
use crate::store::{DataRole, RestoreHook, SampleMap, SampleStore};
use crate::tree::{tree_path, PackedTree};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Returned when no label wins enough of the vote
pub const UNKNOWN_LABEL: u8 = 255;

/// RNG stream for bootstrap draws; tree streams use `0..255`
const BOOTSTRAP_STREAM: u64 = u64::MAX;

/// Vote share a label needs by default: `1.25 / num_features`, or 0.4 for two features
pub fn default_unity_threshold(num_features: u16) -> f32 {
    match num_features {
        2 => 0.4,
        0 => 1.0,
        n => 1.25 / n as f32,
    }
}

/// Per-sample vote tally
///
/// Votes for labels outside `0..num_labels` can only win nothing, but they
/// still count toward the total the winning share is measured against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ballot {
    counts: Vec<u16>,
    total: u16,
}

impl Ballot {
    pub fn new(num_labels: u8) -> Self {
        Self {
            counts: vec![0; num_labels as usize],
            total: 0,
        }
    }

    pub fn cast(&mut self, label: u8) {
        if let Some(c) = self.counts.get_mut(label as usize) {
            *c += 1;
        }
        self.total += 1;
    }

    pub fn total(&self) -> u16 {
        self.total
    }

    /// Plurality label (lowest label on ties), or [`UNKNOWN_LABEL`] when its
    /// share of all votes is below `threshold`
    pub fn decide(&self, threshold: f32) -> u8 {
        if self.total == 0 {
            return UNKNOWN_LABEL;
        }
        let (mut label, mut best) = (0usize, 0u16);
        for (l, &c) in self.counts.iter().enumerate() {
            if c > best {
                label = l;
                best = c;
            }
        }
        if best > 0 && best as f32 / self.total as f32 >= threshold {
            label as u8
        } else {
            UNKNOWN_LABEL
        }
    }
}

/// Tally per-tree votes and decide
pub fn aggregate_votes(votes: impl IntoIterator<Item = u8>, num_labels: u8, threshold: f32) -> u8 {
    let mut ballot = Ballot::new(num_labels);
    for vote in votes {
        ballot.cast(vote);
    }
    ballot.decide(threshold)
}

/// How a forest's votes turn into a scored prediction
#[derive(Debug, Clone, Copy)]
struct BallotRules {
    num_labels: u8,
    threshold: f32,
    /// Leave undecided samples out instead of counting them as misses
    skip_unknown: bool,
}

/// Page each tree in, collect its votes on `samples`, then score the
/// decisions. With `oob`, tree `i` only votes on IDs in `oob[i]`. Samples
/// that got no vote are skipped.
fn vote_and_score(
    trees: &mut [PackedTree],
    fs: &dyn FlashFs,
    samples: &SampleMap,
    oob: Option<&[BTreeSet<u16>]>,
    rules: BallotRules,
) -> Scores {
    let mut ballots: BTreeMap<u16, Ballot> = BTreeMap::new();
    for (i, tree) in trees.iter_mut().enumerate() {
        let resident = tree.is_loaded();
        if let Err(err) = tree.load(fs) {
            debug!(tree = i, error = %err, "tree skipped during scoring");
            continue;
        }
        let mut cast = |id: u16, sample: &Sample| {
            ballots
                .entry(id)
                .or_insert_with(|| Ballot::new(rules.num_labels))
                .cast(tree.predict_sample(sample));
        };
        match oob {
            Some(sets) => {
                for id in sets.get(i).into_iter().flatten() {
                    if let Some(sample) = samples.get(id) {
                        cast(*id, sample);
                    }
                }
            }
            None => {
                for (id, sample) in samples {
                    cast(*id, sample);
                }
            }
        }
        if !resident {
            tree.unload();
        }
    }

    let mut tally = ConfusionTally::new(rules.num_labels);
    let mut uncertain = 0usize;
    for (id, ballot) in &ballots {
        let Some(sample) = samples.get(id) else {
            continue;
        };
        let predicted = ballot.decide(rules.threshold);
        if predicted == UNKNOWN_LABEL && rules.skip_unknown {
            uncertain += 1;
            continue;
        }
        tally.record(sample.label, predicted);
    }
    debug!(
        samples = samples.len(),
        voted = ballots.len(),
        uncertain,
        "votes tallied"
    );
    tally.scores()
}

/// Replays lost stores from BASE using the sample IDs recorded for each role
pub struct BackupRestore {
    fs: SharedFs,
    num_features: u16,
    backups: RwLock<HashMap<DataRole, Vec<u16>>>,
}

impl BackupRestore {
    pub fn new(fs: SharedFs, num_features: u16) -> Self {
        Self {
            fs,
            num_features,
            backups: RwLock::new(HashMap::new()),
        }
    }

    pub fn remember(&self, role: DataRole, mut ids: Vec<u16>) {
        ids.sort_unstable();
        self.backups.write().insert(role, ids);
    }

    pub fn forget_subsets(&self) {
        self.backups
            .write()
            .retain(|role, _| !matches!(role, DataRole::Subset(_)));
    }
}

impl RestoreHook for BackupRestore {
    fn restore(&self, role: DataRole) -> Option<SampleMap> {
        let ids = self.backups.read().get(&role)?.clone();
        info!(role = %role, samples = ids.len(), "restoring from base data");
        let mut base = SampleStore::new(Arc::clone(&self.fs), DataRole::Base, self.num_features);
        if let Err(err) = base.load_data_filtered(&ids) {
            error!(role = %role, error = %err, "base data unavailable for restore");
            return None;
        }
        base.take_samples().ok()
    }
}

/// Shape of one built tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub nodes: usize,
    pub leaves: usize,
    pub depth: usize,
}

impl TreeStats {
    fn of(tree: &PackedTree) -> Self {
        Self {
            nodes: tree.count_nodes(),
            leaves: tree.count_leaf_nodes(),
            depth: tree.depth(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForestStats {
    pub trees: usize,
    pub total_nodes: usize,
    pub total_leaves: usize,
    pub max_depth: usize,
    pub avg_nodes: f32,
}

pub struct RandomForest {
    pub(crate) fs: SharedFs,
    pub(crate) config: RfConfig,
    pub(crate) num_features: u16,
    pub(crate) num_labels: u8,
    pub(crate) min_split: u16,
    pub(crate) max_depth: u16,
    pub(crate) base: SampleStore,
    pub(crate) train: SampleStore,
    pub(crate) test: SampleStore,
    pub(crate) valid: Option<SampleStore>,
    pub(crate) train_ids: Vec<u16>,
    pub(crate) subsets: Vec<SampleStore>,
    pub(crate) oob: Vec<BTreeSet<u16>>,
    pub(crate) trees: Vec<PackedTree>,
    pub(crate) tree_stats: Vec<Option<TreeStats>>,
    pub(crate) predictor: NodePredictor,
    pub(crate) restorer: Arc<BackupRestore>,
    pub(crate) sampler: BootstrapSampler,
    pub(crate) rng: LcgRng,
}

impl RandomForest {
    /// Ingest the dataset, split it and draw every tree's bootstrap subset
    ///
    /// The CSV named in the config is converted to BASE (and deleted) on the
    /// first run; later runs reuse `/base_data.bin`.
    pub fn new(fs: SharedFs, config: RfConfig) -> Result<Self> {
        for warning in config.validate()? {
            warn!("config: {}", warning);
        }

        let mut base = SampleStore::new(
            Arc::clone(&fs),
            DataRole::Base,
            config.storage.num_features,
        )
        .with_sample_limit(config.storage.max_samples);
        let csv = config.storage.csv_file.clone();
        if fs.exists(&csv) {
            let report = base.load_csv_data(&csv, config.storage.num_features)?;
            info!(
                valid = report.valid,
                invalid = report.invalid,
                empty = report.empty,
                truncated = report.truncated,
                "csv ingested"
            );
            base.release_data(false)?;
        } else if !base.on_flash() {
            return Err(ForestError::NoDataset {
                csv,
                base: DataRole::Base.path()?,
            });
        }

        base.load_data()?;
        let (count, max_label) = {
            let samples = base.samples()?;
            (
                samples.len(),
                samples.values().map(|s| s.label).max().unwrap_or(0),
            )
        };
        let num_features = base.num_features();
        base.release_data(true)?;
        if count < 4 {
            return Err(ForestError::InvalidDataset(format!(
                "{count} samples, need at least 4"
            )));
        }
        if max_label == UNKNOWN_LABEL {
            return Err(ForestError::InvalidDataset(format!(
                "label {UNKNOWN_LABEL} is reserved for unknown predictions"
            )));
        }

        let mut predictor = NodePredictor::new(Arc::clone(&fs));
        if let Err(err) = predictor.load() {
            debug!(error = %err, "no usable node predictor, using heuristic");
        }

        let restorer = Arc::new(BackupRestore::new(Arc::clone(&fs), num_features));
        let store = |role| {
            SampleStore::new(Arc::clone(&fs), role, num_features)
                .with_restore(Arc::clone(&restorer) as Arc<dyn RestoreHook>)
        };
        let valid = (config.split.valid_ratio > 0.0).then(|| store(DataRole::Valid));

        let mut forest = Self {
            train: store(DataRole::Train),
            test: store(DataRole::Test),
            valid,
            base,
            num_features,
            num_labels: max_label + 1,
            min_split: config.forest.min_split,
            max_depth: config.forest.max_depth,
            train_ids: Vec::new(),
            subsets: Vec::new(),
            oob: Vec::new(),
            trees: Vec::new(),
            tree_stats: Vec::new(),
            predictor,
            restorer,
            sampler: BootstrapSampler::new(config.forest.bootstrap_ratio),
            rng: LcgRng::new(config.training.random_seed),
            fs,
            config,
        };
        info!(
            samples = count,
            features = num_features,
            labels = forest.num_labels,
            "dataset ready"
        );
        forest.split_data()?;
        forest.clone_data()?;
        Ok(forest)
    }

    pub fn config(&self) -> &RfConfig {
        &self.config
    }

    pub fn num_features(&self) -> u16 {
        self.num_features
    }

    pub fn num_labels(&self) -> u8 {
        self.num_labels
    }

    pub fn train_ids(&self) -> &[u16] {
        &self.train_ids
    }

    pub fn oob_sets(&self) -> &[BTreeSet<u16>] {
        &self.oob
    }

    pub fn predictor(&self) -> &NodePredictor {
        &self.predictor
    }

    pub fn tree_count(&self) -> usize {
        self.subsets.len()
    }

    /// Active `(min_split, max_depth)`
    pub fn params(&self) -> (u16, u16) {
        (self.min_split, self.max_depth)
    }

    /// Takes effect on the next `build_forest`
    pub fn set_params(&mut self, min_split: u16, max_depth: u16) {
        self.min_split = min_split;
        self.max_depth = max_depth;
    }

    pub fn unity_threshold(&self) -> f32 {
        self.config
            .forest
            .unity_threshold
            .unwrap_or_else(|| default_unity_threshold(self.num_features))
    }

    /// Stratified split of BASE into TRAIN, TEST and optionally VALID
    pub fn split_data(&mut self) -> Result<()> {
        self.base.load_data()?;
        let samples = self.base.samples()?;

        let mut by_label: BTreeMap<u8, Vec<u16>> = BTreeMap::new();
        for (id, sample) in samples {
            by_label.entry(sample.label).or_default().push(*id);
        }

        let (mut train, mut test, mut valid) = (SampleMap::new(), SampleMap::new(), SampleMap::new());
        let ratios = &self.config.split;
        for ids in by_label.values_mut() {
            self.rng.shuffle(ids);
            let n = ids.len();
            let n_train = ((n as f32 * ratios.train_ratio).round() as usize).clamp(1, n);
            let n_valid = ((n as f32 * ratios.valid_ratio).round() as usize).min(n - n_train);
            for (k, id) in ids.iter().enumerate() {
                let target = if k < n_train {
                    &mut train
                } else if k < n_train + n_valid {
                    &mut valid
                } else {
                    &mut test
                };
                if let Some(sample) = samples.get(id) {
                    target.insert(*id, sample.clone());
                }
            }
        }

        info!(
            train = train.len(),
            test = test.len(),
            valid = valid.len(),
            "stratified split"
        );
        self.train_ids = train.keys().copied().collect();
        self.restorer.remember(DataRole::Train, self.train_ids.clone());
        self.restorer
            .remember(DataRole::Test, test.keys().copied().collect());

        self.train.adopt(train);
        self.train.release_data(false)?;
        self.test.adopt(test);
        self.test.release_data(false)?;
        if let Some(store) = self.valid.as_mut() {
            self.restorer
                .remember(DataRole::Valid, valid.keys().copied().collect());
            store.adopt(valid);
            store.release_data(false)?;
        }
        self.base.release_data(true)?;
        Ok(())
    }

    /// Draw, persist and release one bootstrap subset per tree
    ///
    /// Draws come from a fixed stream of the seed, so the same training set
    /// always yields the same subsets.
    pub fn clone_data(&mut self) -> Result<()> {
        for store in &mut self.subsets {
            store.purge_data();
        }
        self.subsets.clear();
        self.oob.clear();
        self.sampler.forget();
        self.restorer.forget_subsets();

        self.train.load_data()?;
        let train = self.train.samples()?;
        let with_replicas = self.config.forest.use_bootstrap_replicas;
        let mut rng = LcgRng::for_stream(self.config.training.random_seed, BOOTSTRAP_STREAM);

        for index in 0..self.config.forest.num_trees as u8 {
            let subset = self.sampler.draw_unique(&self.train_ids, &mut rng);
            let mut store = SampleStore::new(
                Arc::clone(&self.fs),
                DataRole::Subset(index),
                self.num_features,
            )
            .with_restore(Arc::clone(&self.restorer) as Arc<dyn RestoreHook>);

            if let Err(err) = materialize(&subset, train, &mut store, with_replicas, &mut rng) {
                warn!(tree = index, error = %err, "replicas skipped");
            }
            debug!(
                tree = index,
                in_bag = subset.in_bag.len(),
                oob = subset.oob.len(),
                stored = store.len(),
                "bootstrap subset"
            );
            self.restorer.remember(
                DataRole::Subset(index),
                subset.in_bag.iter().copied().collect(),
            );
            if let Err(err) = store.release_data(false) {
                warn!(tree = index, error = %err, "subset not persisted, it will be restored on load");
            }
            self.oob.push(subset.oob);
            self.subsets.push(store);
        }
        self.train.release_data(true)?;
        Ok(())
    }

    /// Sample IDs stored in tree `index`'s subset
    pub fn subset_ids(&mut self, index: usize) -> Result<Vec<u16>> {
        let store = self
            .subsets
            .get_mut(index)
            .ok_or(ForestError::NoSuchTree(index))?;
        let was_loaded = store.is_loaded();
        store.load_data()?;
        let ids = store.ids()?;
        if !was_loaded {
            store.release_data(true)?;
        }
        Ok(ids)
    }

    /// Induce every tree with the active parameters; returns how many succeeded
    ///
    /// Tree `i` draws its features from a stream seeded by `(seed, i)`, so
    /// rebuilding with the same parameters reproduces the same forest.
    pub fn build_forest(&mut self) -> Result<usize> {
        let forest = &self.config.forest;
        let impurity_threshold = match forest.impurity {
            Impurity::Entropy => forest.impurity_threshold,
            // Gini gains are bounded by 1 - 1/k rather than log2(k)
            Impurity::Gini => forest.impurity_threshold / 4.0,
        };
        let params = InductionParams {
            min_split: self.min_split,
            max_depth: self.max_depth,
            impurity_threshold,
            num_features: self.num_features,
            impurity: forest.impurity,
        };
        let hint = self.predictor.estimate_peak(self.min_split, self.max_depth);

        self.trees.clear();
        self.tree_stats.clear();
        let mut built = 0;
        for i in 0..self.subsets.len() {
            let index = i as u8;
            match self.build_one(i, params, hint) {
                Ok(stats) => {
                    built += 1;
                    self.tree_stats.push(Some(stats));
                }
                Err(err) => {
                    error!(tree = index, error = %err, "tree build failed");
                    self.discard_tree_file(index);
                    self.tree_stats.push(None);
                }
            }
            self.trees.push(PackedTree::new(index));
        }

        let stats = self.forest_stats();
        info!(
            built,
            min_split = self.min_split,
            max_depth = self.max_depth,
            avg_nodes = stats.avg_nodes,
            max_depth_seen = stats.max_depth,
            "forest built"
        );
        if built == 0 {
            warn!("no tree could be built");
        }
        Ok(built)
    }

    fn build_one(&mut self, i: usize, params: InductionParams, hint: usize) -> Result<TreeStats> {
        let seed = self.config.training.random_seed;
        let subset = &mut self.subsets[i];
        subset.load_data()?;
        let nodes = build_tree(subset.samples()?, params, LcgRng::for_stream(seed, i as u64), hint);
        subset.release_data(true)?;
        let nodes = nodes?;

        let tree = PackedTree::from_nodes(i as u8, nodes);
        let stats = TreeStats::of(&tree);
        tree.save(&*self.fs)?;

        let observation = NodeSample {
            min_split: params.min_split,
            max_depth: params.max_depth,
            total_nodes: stats.nodes as u16,
        };
        if let Err(err) = self.predictor.record(observation) {
            warn!(error = %err, "could not log node count");
        }
        debug!(tree = i, nodes = stats.nodes, depth = stats.depth, "tree built");
        Ok(stats)
    }

    fn discard_tree_file(&self, index: u8) {
        if let Ok(path) = tree_path(index) {
            if self.fs.exists(&path) {
                if let Err(err) = self.fs.remove(&path) {
                    warn!(path = %path, error = %err, "failed to remove stale tree");
                }
            }
        }
    }

    /// Bring every tree into RAM for inference; returns how many loaded
    pub fn load_forest(&mut self) -> usize {
        let mut loaded = 0;
        for tree in &mut self.trees {
            match tree.load(&*self.fs) {
                Ok(()) => loaded += 1,
                Err(err) => warn!(tree = tree.index(), error = %err, "tree unavailable"),
            }
        }
        loaded
    }

    pub fn release_forest(&mut self) {
        for tree in &mut self.trees {
            tree.unload();
        }
    }

    pub fn loaded_trees(&self) -> usize {
        self.trees.iter().filter(|t| t.is_loaded()).count()
    }

    /// Majority vote of the loaded trees
    pub fn predict_sample(&self, sample: &Sample) -> u8 {
        aggregate_votes(
            self.trees
                .iter()
                .filter(|t| t.is_loaded())
                .map(|t| t.predict_sample(sample)),
            self.num_labels,
            self.unity_threshold(),
        )
    }

    /// Predict from raw 2-bit feature codes; `None` if a code exceeds 3
    pub fn predict_values(&self, values: &[u8]) -> Option<u8> {
        Sample::from_values(0, values).map(|s| self.predict_sample(&s))
    }

    pub fn forest_stats(&self) -> ForestStats {
        let built: Vec<&TreeStats> = self.tree_stats.iter().flatten().collect();
        let total_nodes = built.iter().map(|s| s.nodes).sum();
        ForestStats {
            trees: built.len(),
            total_nodes,
            total_leaves: built.iter().map(|s| s.leaves).sum(),
            max_depth: built.iter().map(|s| s.depth).max().unwrap_or(0),
            avg_nodes: if built.is_empty() {
                0.0
            } else {
                total_nodes as f32 / built.len() as f32
            },
        }
    }

    /// Out-of-bag scores: each training sample is voted on only by trees
    /// that did not see it
    pub fn oob_scores(&mut self) -> Result<Scores> {
        self.tally(DataRole::Train, true, true)
    }

    /// Whole-forest scores on the training set
    pub fn train_scores(&mut self) -> Result<Scores> {
        self.tally(DataRole::Train, false, true)
    }

    pub fn validation_scores(&mut self) -> Result<Option<Scores>> {
        if self.valid.is_none() {
            return Ok(None);
        }
        self.tally(DataRole::Valid, false, false).map(Some)
    }

    pub fn test_scores(&mut self) -> Result<Scores> {
        self.tally(DataRole::Test, false, false)
    }

    fn tally(&mut self, role: DataRole, oob_only: bool, skip_unknown: bool) -> Result<Scores> {
        let ballot = BallotRules {
            num_labels: self.num_labels,
            threshold: self.unity_threshold(),
            skip_unknown,
        };
        let store = match role {
            DataRole::Train => &mut self.train,
            DataRole::Test => &mut self.test,
            DataRole::Valid => match self.valid.as_mut() {
                Some(store) => store,
                None => return Ok(Scores::default()),
            },
            other => {
                return Err(ForestError::InvalidDataset(format!(
                    "{other} data cannot be scored"
                )))
            }
        };
        let was_loaded = store.is_loaded();
        store.load_data()?;
        let oob = oob_only.then_some(self.oob.as_slice());
        let scores = vote_and_score(&mut self.trees, &*self.fs, store.samples()?, oob, ballot);
        if !was_loaded {
            store.release_data(true)?;
        }
        debug!(role = %role, oob_only, accuracy = scores.accuracy, "scored");
        Ok(scores)
    }

    /// Replace TRAIN with `samples` and redraw every subset from it
    fn install_train(&mut self, samples: SampleMap) -> Result<()> {
        self.train_ids = samples.keys().copied().collect();
        self.restorer.remember(DataRole::Train, self.train_ids.clone());
        self.train.adopt(samples);
        self.train.release_data(false)?;
        self.clone_data()
    }

    /// Mean objective over `k` contiguous folds of TRAIN, each scored by a
    /// forest built on the other folds with the active parameters
    ///
    /// Returns `None` when TRAIN is too small for `k` folds. Afterwards the
    /// full training set, its subsets and the forest are rebuilt exactly as
    /// they were.
    pub fn cross_validation_score(&mut self, k: u8) -> Result<Option<f32>> {
        let k = k as usize;
        if k < 2 || self.train_ids.len() < k * self.num_labels as usize * 2 {
            warn!(folds = k, samples = self.train_ids.len(), "not enough samples for k-fold");
            return Ok(None);
        }
        self.train.load_data()?;
        let full = self.train.take_samples()?;
        let folds = self.score_folds(&full, k);
        self.install_train(full)?;
        self.build_forest()?;
        folds.map(Some)
    }

    fn score_folds(&mut self, full: &SampleMap, k: usize) -> Result<f32> {
        let flags = self.config.metric_flags();
        let ballot = BallotRules {
            num_labels: self.num_labels,
            threshold: self.unity_threshold(),
            skip_unknown: true,
        };
        let fold_size = full.len() / k;
        let mut sum = 0.0;
        for fold in 0..k {
            let held_range = fold * fold_size..(fold + 1) * fold_size;
            let (mut held, mut rest) = (SampleMap::new(), SampleMap::new());
            for (pos, (id, sample)) in full.iter().enumerate() {
                let side = if held_range.contains(&pos) {
                    &mut held
                } else {
                    &mut rest
                };
                side.insert(*id, sample.clone());
            }
            self.install_train(rest)?;
            self.build_forest()?;
            let scores = vote_and_score(&mut self.trees, &*self.fs, &held, None, ballot);
            debug!(fold, held = held.len(), accuracy = scores.accuracy, "fold scored");
            sum += scores.objective(flags);
        }
        let score = sum / k as f32;
        info!(folds = k, score, "cross validation");
        Ok(score)
    }

    /// Delete the working TRAIN/TEST/VALID/SUB files and clear RAM; trees,
    /// BASE and the predictor stay on flash
    pub fn purge_working_data(&mut self) {
        for store in &mut self.subsets {
            store.purge_data();
        }
        self.train.purge_data();
        self.test.purge_data();
        if let Some(store) = self.valid.as_mut() {
            store.purge_data();
        }
        self.release_forest();
    }

    /// Remove everything this forest put on flash, including trees and BASE
    pub fn purge(&mut self) {
        self.purge_working_data();
        for tree in &mut self.trees {
            tree.purge(&*self.fs);
        }
        self.trees.clear();
        self.tree_stats.clear();
        self.base.purge_data();
    }
}

impl Drop for RandomForest {
    fn drop(&mut self) {
        self.purge_working_data();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plurality_above_threshold_wins() {
        // A = 0, B = 1, C = 2
        assert_eq!(aggregate_votes([0, 0, 1], 3, 0.5), 0);
        assert_eq!(aggregate_votes([0, 1, 2], 3, 0.5), UNKNOWN_LABEL);
    }

    #[test]
    fn test_votes_outside_label_range_count_toward_total() {
        // 1 of 3 votes is a valid label
        assert_eq!(aggregate_votes([7, 7, 1], 3, 0.5), UNKNOWN_LABEL);
        assert_eq!(aggregate_votes([7, 7, 1], 3, 0.3), 1);
        assert_eq!(aggregate_votes([9], 3, 0.0), UNKNOWN_LABEL);
        assert_eq!(aggregate_votes(std::iter::empty(), 3, 0.1), UNKNOWN_LABEL);
    }

    #[test]
    fn test_default_threshold() {
        assert_eq!(default_unity_threshold(2), 0.4);
        assert!((default_unity_threshold(5) - 0.25).abs() < 1e-6);
        assert!((default_unity_threshold(144) - 1.25 / 144.0).abs() < 1e-9);
    }

    #[test]
    fn test_ballot_tie_prefers_lower_label() {
        let mut ballot = Ballot::new(3);
        for label in [2, 1, 2, 1] {
            ballot.cast(label);
        }
        assert_eq!(ballot.total(), 4);
        assert_eq!(ballot.decide(0.0), 1);
    }
}
