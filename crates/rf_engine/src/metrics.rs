//! Confusion tallies and evaluation metrics

use serde::{Deserialize, Serialize};
use std::ops::BitOr;

/// Metric selectable as the training objective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Accuracy,
    Precision,
    Recall,
    F1,
}

/// Bit set of metrics; the objective is the mean of the selected ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricFlags(u8);

impl MetricFlags {
    pub const ACCURACY: Self = Self(0x01);
    pub const PRECISION: Self = Self(0x02);
    pub const RECALL: Self = Self(0x04);
    pub const F1: Self = Self(0x08);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for MetricFlags {
    fn default() -> Self {
        Self::ACCURACY
    }
}

impl BitOr for MetricFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl From<Metric> for MetricFlags {
    fn from(metric: Metric) -> Self {
        match metric {
            Metric::Accuracy => Self::ACCURACY,
            Metric::Precision => Self::PRECISION,
            Metric::Recall => Self::RECALL,
            Metric::F1 => Self::F1,
        }
    }
}

impl FromIterator<Metric> for MetricFlags {
    fn from_iter<I: IntoIterator<Item = Metric>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self(0), |flags, metric| flags | metric.into())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Scores {
    pub accuracy: f32,
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
    /// Samples that contributed
    pub evaluated: usize,
}

impl Scores {
    /// Mean of the selected metrics; accuracy when nothing is selected
    pub fn objective(&self, flags: MetricFlags) -> f32 {
        if flags.is_empty() {
            return self.accuracy;
        }
        let picked: Vec<f32> = [
            (MetricFlags::ACCURACY, self.accuracy),
            (MetricFlags::PRECISION, self.precision),
            (MetricFlags::RECALL, self.recall),
            (MetricFlags::F1, self.f1),
        ]
        .into_iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .map(|(_, value)| value)
        .collect();
        picked.iter().sum::<f32>() / picked.len() as f32
    }
}

/// Per-label TP/FP/FN counts
#[derive(Debug, Clone)]
pub struct ConfusionTally {
    tp: Vec<u32>,
    fp: Vec<u32>,
    fn_: Vec<u32>,
    correct: u32,
    total: u32,
}

impl ConfusionTally {
    pub fn new(num_labels: u8) -> Self {
        let n = num_labels as usize;
        Self {
            tp: vec![0; n],
            fp: vec![0; n],
            fn_: vec![0; n],
            correct: 0,
            total: 0,
        }
    }

    /// Record one prediction; a predicted label outside the label range is a miss
    pub fn record(&mut self, actual: u8, predicted: u8) {
        let (a, p) = (actual as usize, predicted as usize);
        if a >= self.tp.len() {
            return;
        }
        self.total += 1;
        if a == p {
            self.correct += 1;
            self.tp[a] += 1;
            return;
        }
        self.fn_[a] += 1;
        if let Some(fp) = self.fp.get_mut(p) {
            *fp += 1;
        }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// Accuracy plus macro precision/recall/F1 over labels seen as actual
    pub fn scores(&self) -> Scores {
        if self.total == 0 {
            return Scores::default();
        }
        let mut present = 0usize;
        let (mut precision, mut recall, mut f1) = (0f32, 0f32, 0f32);
        for label in 0..self.tp.len() {
            let (tp, fp, fn_) = (
                self.tp[label] as f32,
                self.fp[label] as f32,
                self.fn_[label] as f32,
            );
            if tp + fn_ == 0.0 {
                continue;
            }
            present += 1;
            let p = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
            let r = tp / (tp + fn_);
            precision += p;
            recall += r;
            if p + r > 0.0 {
                f1 += 2.0 * p * r / (p + r);
            }
        }
        let present = present.max(1) as f32;
        Scores {
            accuracy: self.correct as f32 / self.total as f32,
            precision: precision / present,
            recall: recall / present,
            f1: f1 / present,
            evaluated: self.total as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_predictions() {
        let mut tally = ConfusionTally::new(3);
        for label in [0, 1, 2, 1] {
            tally.record(label, label);
        }
        let scores = tally.scores();
        assert_eq!(scores.accuracy, 1.0);
        assert_eq!(scores.precision, 1.0);
        assert_eq!(scores.recall, 1.0);
        assert_eq!(scores.f1, 1.0);
        assert_eq!(scores.evaluated, 4);
    }

    #[test]
    fn test_macro_average_skips_absent_labels() {
        let mut tally = ConfusionTally::new(4);
        tally.record(0, 0);
        tally.record(0, 1);
        tally.record(1, 1);
        tally.record(1, 1);
        let s = tally.scores();
        assert!((s.accuracy - 0.75).abs() < 1e-6);
        // label 0: p=1, r=0.5; label 1: p=2/3, r=1
        assert!((s.precision - (1.0 + 2.0 / 3.0) / 2.0).abs() < 1e-6);
        assert!((s.recall - 0.75).abs() < 1e-6);
        let f1 = (2.0 * 0.5 / 1.5 + 2.0 * (2.0 / 3.0) / (5.0 / 3.0)) / 2.0;
        assert!((s.f1 - f1).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_prediction_is_a_miss() {
        let mut tally = ConfusionTally::new(2);
        tally.record(1, 255);
        tally.record(0, 0);
        assert_eq!(tally.scores().accuracy, 0.5);
        assert_eq!(ConfusionTally::new(2).scores(), Scores::default());
    }

    #[test]
    fn test_objective_averages_selected_metrics() {
        let scores = Scores {
            accuracy: 0.9,
            precision: 0.5,
            recall: 0.7,
            f1: 0.6,
            evaluated: 10,
        };
        assert_eq!(scores.objective(MetricFlags::ACCURACY), 0.9);
        let both = MetricFlags::PRECISION | MetricFlags::RECALL;
        assert!((scores.objective(both) - 0.6).abs() < 1e-6);
        let flags: MetricFlags = [Metric::Accuracy, Metric::F1].into_iter().collect();
        assert_eq!(flags.bits(), 0x09);
        assert!(flags.contains(MetricFlags::F1));
        assert!(!flags.contains(MetricFlags::RECALL));
    }
}
