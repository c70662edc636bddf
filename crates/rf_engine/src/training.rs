//! Adaptive hyperparameter search
//!
//! Hill-climbs `(min_split, max_depth)` by rebuilding the whole forest for
//! every trial. A trial that does not beat the best measurement is rolled
//! back by rebuilding the best configuration, so the forest left on flash is
//! always the best one seen.

use crate::config::ScoreMode;
use crate::errors::Result;
use crate::forest::RandomForest;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Idle epochs before a forced move
pub const AGGRESSIVE_AFTER: u16 = 3;

const EASY_PATIENCE: u16 = 5;
const DIFFICULT_PATIENCE: u16 = 8;

/// Objective scores of one built forest
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Measurement {
    /// Score on data the trees were not fit to, per `training.score`
    pub held_out: f32,
    pub train: f32,
    /// `train - held_out`; large values mean overfitting
    pub gap: f32,
}

impl Measurement {
    pub fn new(held_out: f32, train: f32) -> Self {
        Self {
            held_out,
            train,
            gap: train - held_out,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TreeParams {
    pub min_split: u16,
    pub max_depth: u16,
}

impl From<(u16, u16)> for TreeParams {
    fn from((min_split, max_depth): (u16, u16)) -> Self {
        Self {
            min_split,
            max_depth,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Target {
    pub min_score: f32,
    pub max_gap: f32,
}

impl Target {
    /// Target picked from the first measurement, and whether the dataset is easy
    pub fn for_baseline(initial: &Measurement) -> (Self, bool) {
        if initial.held_out > 0.85 && initial.gap < 0.15 {
            (
                Self {
                    min_score: 0.98,
                    max_gap: 0.01,
                },
                true,
            )
        } else {
            (
                Self {
                    min_score: 0.88,
                    max_gap: (0.5 * initial.gap).max(0.08),
                },
                false,
            )
        }
    }

    pub fn met(&self, m: &Measurement) -> bool {
        m.held_out >= self.min_score && m.gap <= self.max_gap
    }
}

/// Inclusive search bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParamRanges {
    pub min_split: (u16, u16),
    pub max_depth: (u16, u16),
}

impl ParamRanges {
    /// Bounds scaled to the training set; always contain `start`
    pub fn for_dataset(train_len: usize, start: TreeParams) -> Self {
        let split_cap = ((train_len / 50) as u16).clamp(4, 12);
        Self {
            min_split: (start.min_split.min(2), split_cap.max(start.min_split)),
            max_depth: (start.max_depth.min(3), start.max_depth.max(8)),
        }
    }

    pub fn contains(&self, p: TreeParams) -> bool {
        (self.min_split.0..=self.min_split.1).contains(&p.min_split)
            && (self.max_depth.0..=self.max_depth.1).contains(&p.max_depth)
    }
}

/// Next untried parameters, nudged against whichever constraint binds
///
/// Overfitting shrinks depth first, then raises `min_split`; underfitting
/// grows depth first, then lowers `min_split`. A move already in `tried`
/// falls through to the other one.
pub fn propose(
    current: TreeParams,
    best: &Measurement,
    target: &Target,
    ranges: &ParamRanges,
    tried: &HashSet<TreeParams>,
) -> Option<TreeParams> {
    let TreeParams {
        min_split,
        max_depth,
    } = current;
    let candidates = if best.gap > target.max_gap {
        [
            (min_split, max_depth.saturating_sub(1)),
            (min_split.saturating_add(1), max_depth),
        ]
    } else {
        [
            (min_split, max_depth.saturating_add(1)),
            (min_split.saturating_sub(1), max_depth),
        ]
    };
    candidates
        .into_iter()
        .map(TreeParams::from)
        .find(|p| *p != current && ranges.contains(*p) && !tried.contains(p))
}

/// Untried neighbour of `current`, nearest moves first
pub fn aggressive(
    current: TreeParams,
    ranges: &ParamRanges,
    tried: &HashSet<TreeParams>,
) -> Option<TreeParams> {
    const MOVES: [(i32, i32); 12] = [
        (0, -1),
        (1, 0),
        (0, 1),
        (-1, 0),
        (1, -1),
        (-1, 1),
        (1, 1),
        (-1, -1),
        (0, -2),
        (2, 0),
        (0, 2),
        (-2, 0),
    ];
    MOVES.iter().find_map(|(ds, dd)| {
        let split = u16::try_from(current.min_split as i32 + ds).ok()?;
        let depth = u16::try_from(current.max_depth as i32 + dd).ok()?;
        let p = TreeParams::from((split, depth));
        (ranges.contains(p) && !tried.contains(&p)).then_some(p)
    })
}

/// `candidate` is no worse on either axis and better on one by `tolerance`
pub fn improves(candidate: &Measurement, best: &Measurement, tolerance: f32) -> bool {
    candidate.held_out >= best.held_out
        && candidate.gap <= best.gap
        && (candidate.held_out - best.held_out >= tolerance || best.gap - candidate.gap >= tolerance)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetMet,
    Patience,
    EpochsExhausted,
    SearchExhausted,
}

/// One rebuilt configuration and whether it became the new best
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Trial {
    pub epoch: u16,
    pub params: TreeParams,
    pub measurement: Measurement,
    pub kept: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub easy_dataset: bool,
    pub target: Target,
    pub initial: Measurement,
    pub best: Measurement,
    pub params: TreeParams,
    pub epochs_run: u16,
    /// Forest builds, the baseline included
    pub rebuilds: u16,
    pub stop: StopReason,
    pub trials: Vec<Trial>,
}

/// What the parameter search drives
pub trait SearchSubject {
    fn current_params(&self) -> TreeParams;
    fn train_len(&self) -> usize;
    /// Rebuild with `params` and measure the result
    fn trial(&mut self, params: TreeParams) -> Result<Measurement>;
    /// Rebuild with `params` after a rejected trial
    fn restore(&mut self, params: TreeParams) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct SearchSettings {
    pub epochs: u16,
    pub early_stop: bool,
    pub tolerance: f32,
}

/// Hill-climb from `initial`, the measurement of the subject as it stands
///
/// The subject ends built with the best parameters seen.
pub fn search<S: SearchSubject>(
    subject: &mut S,
    initial: Measurement,
    settings: SearchSettings,
) -> Result<TrainingReport> {
    let (target, easy) = Target::for_baseline(&initial);
    let patience = match (settings.early_stop, easy) {
        (false, _) => u16::MAX,
        (true, true) => EASY_PATIENCE,
        (true, false) => DIFFICULT_PATIENCE,
    };

    let mut best = initial;
    let mut best_params = subject.current_params();
    let ranges = ParamRanges::for_dataset(subject.train_len(), best_params);
    let mut tried = HashSet::from([best_params]);
    let mut trials = Vec::new();
    info!(
        held_out = initial.held_out,
        gap = initial.gap,
        easy,
        target_score = target.min_score,
        target_gap = target.max_gap,
        split_range = ?ranges.min_split,
        depth_range = ?ranges.max_depth,
        "training started"
    );

    let (mut idle, mut stale, mut epochs_run) = (0u16, 0u16, 0u16);
    let mut rebuilds = 1u16;
    let mut stop = StopReason::EpochsExhausted;
    for epoch in 1..=settings.epochs {
        if target.met(&best) {
            stop = StopReason::TargetMet;
            break;
        }
        epochs_run = epoch;

        let proposal = if idle >= AGGRESSIVE_AFTER {
            aggressive(best_params, &ranges, &tried)
        } else {
            propose(best_params, &best, &target, &ranges, &tried)
        };
        let Some(candidate) = proposal else {
            if idle >= AGGRESSIVE_AFTER {
                stop = StopReason::SearchExhausted;
                break;
            }
            idle += 1;
            stale += 1;
            debug!(epoch, idle, "no parameter change");
            if stale >= patience {
                stop = StopReason::Patience;
                break;
            }
            continue;
        };
        if idle >= AGGRESSIVE_AFTER {
            info!(epoch, min_split = candidate.min_split, max_depth = candidate.max_depth, "aggressive move");
        }
        idle = 0;
        tried.insert(candidate);

        let m = subject.trial(candidate)?;
        rebuilds += 1;
        let kept = improves(&m, &best, settings.tolerance);
        trials.push(Trial {
            epoch,
            params: candidate,
            measurement: m,
            kept,
        });

        if kept {
            info!(
                epoch,
                min_split = candidate.min_split,
                max_depth = candidate.max_depth,
                held_out = m.held_out,
                gap = m.gap,
                "improved"
            );
            best = m;
            best_params = candidate;
            stale = 0;
        } else {
            info!(
                epoch,
                min_split = candidate.min_split,
                max_depth = candidate.max_depth,
                held_out = m.held_out,
                gap = m.gap,
                "no improvement, reverting"
            );
            subject.restore(best_params)?;
            rebuilds += 1;
            stale += 1;
            if stale >= patience {
                stop = StopReason::Patience;
                break;
            }
        }
    }
    if stop == StopReason::EpochsExhausted && target.met(&best) {
        stop = StopReason::TargetMet;
    }

    info!(
        ?stop,
        epochs_run,
        rebuilds,
        min_split = best_params.min_split,
        max_depth = best_params.max_depth,
        held_out = best.held_out,
        gap = best.gap,
        "training finished"
    );
    Ok(TrainingReport {
        easy_dataset: easy,
        target,
        initial,
        best,
        params: best_params,
        epochs_run,
        rebuilds,
        stop,
        trials,
    })
}

impl SearchSubject for RandomForest {
    fn current_params(&self) -> TreeParams {
        TreeParams::from(self.params())
    }

    fn train_len(&self) -> usize {
        self.train_ids.len()
    }

    fn trial(&mut self, params: TreeParams) -> Result<Measurement> {
        self.set_params(params.min_split, params.max_depth);
        self.build_forest()?;
        self.measure()
    }

    fn restore(&mut self, params: TreeParams) -> Result<()> {
        self.set_params(params.min_split, params.max_depth);
        self.build_forest()?;
        Ok(())
    }
}

impl RandomForest {
    /// Score the currently built forest with the configured objective
    ///
    /// The held-out side follows `training.score`. `Valid` blends the
    /// validation score into OOB by `combine_ratio` and `KFold` rebuilds the
    /// forest once per fold. Both fall back to OOB when their data is missing.
    pub fn measure(&mut self) -> Result<Measurement> {
        let flags = self.config.metric_flags();
        let oob = self.oob_scores()?.objective(flags);
        let train = self.train_scores()?.objective(flags);
        let held_out = match self.config.training.score {
            ScoreMode::Oob => oob,
            ScoreMode::Valid => {
                let ratio = self.config.training.combine_ratio;
                match self.validation_scores()? {
                    Some(valid) => ratio * valid.objective(flags) + (1.0 - ratio) * oob,
                    None => oob,
                }
            }
            ScoreMode::KFold => {
                let k = self.config.training.k_folds;
                self.cross_validation_score(k)?.unwrap_or(oob)
            }
        };
        Ok(Measurement::new(held_out, train))
    }

    /// Build the forest, then search `(min_split, max_depth)` for up to
    /// `epochs` trials, ending with the best configuration built
    pub fn training(&mut self, epochs: u16, early_stop: bool) -> Result<TrainingReport> {
        self.build_forest()?;
        let initial = self.measure()?;
        let settings = SearchSettings {
            epochs,
            early_stop,
            tolerance: self.config.training.min_improvement,
        };
        let report = search(self, initial, settings)?;

        match self.predictor.retrain() {
            Ok(true) => {
                if let Err(err) = self.predictor.save() {
                    warn!(error = %err, "could not save node predictor");
                }
            }
            Ok(false) => debug!("node predictor needs more log rows"),
            Err(err) => warn!(error = %err, "node predictor retrain failed"),
        }
        Ok(report)
    }
}
