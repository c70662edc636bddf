//! Forest configuration
//!
//! Loaded from TOML, then optionally overridden from `RF_*` environment
//! variables. Every section has defaults so partial files are fine.

use crate::dataset::MAX_SAMPLES;
use crate::errors::ConfigError;
use crate::induction::Impurity;
use crate::metrics::{Metric, MetricFlags};
use crate::store::NO_TREE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RfConfig {
    pub forest: ForestConfig,
    pub split: SplitConfig,
    pub training: TrainingConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Tree and ensemble parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub num_trees: u16,
    pub min_split: u16,
    /// Tree levels including the root
    pub max_depth: u16,
    pub impurity: Impurity,
    /// Entropy scale; Gini uses a quarter of it
    pub impurity_threshold: f32,
    pub bootstrap_ratio: f32,
    /// Pad subsets with duplicated samples under synthetic IDs
    pub use_bootstrap_replicas: bool,
    /// Vote share a label needs to be reported; derived from the feature count when unset
    pub unity_threshold: Option<f32>,
    /// Metrics averaged into the training objective
    pub metrics: Vec<Metric>,
}

/// Dataset partitioning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub train_ratio: f32,
    /// 0 disables the validation set
    pub valid_ratio: f32,
}

/// Held-out score the adaptive loop optimizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMode {
    /// Out-of-bag votes on the training set
    #[default]
    Oob,
    /// Validation score blended with OOB by `combine_ratio`
    Valid,
    /// Mean score over `k_folds` folds of the training set
    KFold,
}

/// Adaptive training loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: u16,
    pub early_stop: bool,
    pub min_improvement: f32,
    pub random_seed: i64,
    pub score: ScoreMode,
    /// Weight of the validation score under `ScoreMode::Valid`
    pub combine_ratio: f32,
    pub k_folds: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Host directory standing in for flash
    pub root: PathBuf,
    /// Source CSV, as a flash path
    pub csv_file: String,
    /// 0 infers the width from the first CSV row
    pub num_features: u16,
    /// CSV rows kept at ingestion
    pub max_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            num_trees: 20,
            min_split: 2,
            max_depth: 13,
            impurity: Impurity::Entropy,
            impurity_threshold: 0.01,
            bootstrap_ratio: 0.632,
            use_bootstrap_replicas: true,
            unity_threshold: None,
            metrics: vec![Metric::Accuracy],
        }
    }
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_ratio: 0.75,
            valid_ratio: 0.0,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 20,
            early_stop: true,
            min_improvement: 0.003,
            random_seed: 37,
            score: ScoreMode::Oob,
            combine_ratio: 0.5,
            k_folds: 4,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("flash"),
            csv_file: "/dataset.csv".to_string(),
            num_features: 0,
            max_samples: MAX_SAMPLES,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl RfConfig {
    /// Parse a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `RF_*` environment overrides; returns the keys that changed
    pub fn apply_env_overrides(&mut self) -> Vec<&'static str> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Override source abstracted for tests
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Vec<&'static str> {
        let mut applied = Vec::new();

        fn parse_into<T: std::str::FromStr>(raw: Option<String>, key: &'static str, slot: &mut T) -> bool {
            let Some(raw) = raw else {
                return false;
            };
            match raw.trim().parse() {
                Ok(value) => {
                    *slot = value;
                    true
                }
                Err(_) => {
                    warn!("Ignoring unparsable {}={}", key, raw);
                    false
                }
            }
        }

        if parse_into(lookup("RF_NUM_TREES"), "RF_NUM_TREES", &mut self.forest.num_trees) {
            applied.push("forest.num_trees");
        }
        if parse_into(lookup("RF_MIN_SPLIT"), "RF_MIN_SPLIT", &mut self.forest.min_split) {
            applied.push("forest.min_split");
        }
        if parse_into(lookup("RF_MAX_DEPTH"), "RF_MAX_DEPTH", &mut self.forest.max_depth) {
            applied.push("forest.max_depth");
        }
        if parse_into(lookup("RF_SEED"), "RF_SEED", &mut self.training.random_seed) {
            applied.push("training.random_seed");
        }
        if parse_into(lookup("RF_EPOCHS"), "RF_EPOCHS", &mut self.training.epochs) {
            applied.push("training.epochs");
        }
        if let Some(level) = lookup("RF_LOG_LEVEL") {
            self.logging.level = level;
            applied.push("logging.level");
        }

        for key in &applied {
            info!("Configuration override applied: {}", key);
        }
        applied
    }

    /// Reject impossible settings; returns warnings for questionable ones
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        let invalid = |key, reason: String| Err(ConfigError::Invalid { key, reason });
        let f = &self.forest;

        if f.num_trees == 0 || f.num_trees >= NO_TREE as u16 {
            return invalid("forest.num_trees", format!("{} not in 1..=254", f.num_trees));
        }
        if !(f.bootstrap_ratio > 0.0 && f.bootstrap_ratio <= 1.0) {
            return invalid("forest.bootstrap_ratio", format!("{} not in (0, 1]", f.bootstrap_ratio));
        }
        if let Some(t) = f.unity_threshold {
            if !(0.0..=1.0).contains(&t) {
                return invalid("forest.unity_threshold", format!("{t} not in [0, 1]"));
            }
        }
        let s = &self.split;
        if !(s.train_ratio > 0.0 && s.train_ratio < 1.0) {
            return invalid("split.train_ratio", format!("{} not in (0, 1)", s.train_ratio));
        }
        if s.valid_ratio < 0.0 || s.train_ratio + s.valid_ratio >= 1.0 {
            return invalid(
                "split.valid_ratio",
                format!("{} leaves no room for a test set", s.valid_ratio),
            );
        }
        let t = &self.training;
        if !(0.0..=1.0).contains(&t.combine_ratio) {
            return invalid("training.combine_ratio", format!("{} not in [0, 1]", t.combine_ratio));
        }
        if t.score == ScoreMode::KFold && !(2..=10).contains(&t.k_folds) {
            return invalid("training.k_folds", format!("{} not in 2..=10", t.k_folds));
        }
        if self.storage.max_samples == 0 || self.storage.max_samples > MAX_SAMPLES {
            return invalid(
                "storage.max_samples",
                format!("{} not in 1..={MAX_SAMPLES}", self.storage.max_samples),
            );
        }
        if self.storage.num_features > 1024 {
            return invalid(
                "storage.num_features",
                format!("{} exceeds the 10-bit feature id", self.storage.num_features),
            );
        }

        let mut warnings = Vec::new();
        if f.min_split < 2 {
            warnings.push(format!("min_split {} will split single samples", f.min_split));
        }
        if f.max_depth == 0 {
            warnings.push("max_depth 0 builds single-leaf trees".to_string());
        }
        if f.metrics.is_empty() {
            warnings.push("no metrics selected, accuracy will be used".to_string());
        }
        if t.score == ScoreMode::Valid && s.valid_ratio <= 0.0 {
            warnings.push("valid score without a validation split, OOB will be used".to_string());
        }
        if self.training.min_improvement <= 0.0 {
            warnings.push("min_improvement <= 0 accepts noise as progress".to_string());
        }
        Ok(warnings)
    }

    pub fn metric_flags(&self) -> MetricFlags {
        self.forest.metrics.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = RfConfig::default();
        assert_eq!(config.forest.num_trees, 20);
        assert_eq!(config.training.random_seed, 37);
        assert!(config.validate().unwrap().is_empty());
        assert_eq!(config.metric_flags(), MetricFlags::ACCURACY);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "[forest]")?;
        writeln!(file, "num_trees = 5")?;
        writeln!(file, "metrics = [\"accuracy\", \"f1\"]")?;
        writeln!(file, "[split]")?;
        writeln!(file, "valid_ratio = 0.1")?;

        let config = RfConfig::load_from_file(file.path())?;
        assert_eq!(config.forest.num_trees, 5);
        assert_eq!(config.forest.max_depth, 13);
        assert_eq!(config.split.train_ratio, 0.75);
        assert_eq!(config.split.valid_ratio, 0.1);
        assert_eq!(config.metric_flags().bits(), 0x09);
        Ok(())
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("RF_NUM_TREES", "8"),
            ("RF_MAX_DEPTH", "oops"),
            ("RF_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();
        let mut config = RfConfig::default();
        let applied = config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(applied, vec!["forest.num_trees", "logging.level"]);
        assert_eq!(config.forest.num_trees, 8);
        assert_eq!(config.forest.max_depth, 13);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = RfConfig::default();
        config.forest.num_trees = 255;
        assert!(config.validate().is_err());

        let mut config = RfConfig::default();
        config.split.valid_ratio = 0.25;
        assert!(config.validate().is_err());

        let mut config = RfConfig::default();
        config.forest.bootstrap_ratio = 0.0;
        assert!(config.validate().is_err());

        let mut config = RfConfig::default();
        config.forest.min_split = 1;
        assert_eq!(config.validate().unwrap().len(), 1);
    }

    #[test]
    fn test_score_modes_and_impurity_parse() -> anyhow::Result<()> {
        let config = RfConfig::from_toml(
            "[forest]\nimpurity = \"gini\"\n[training]\nscore = \"k_fold\"\nk_folds = 3\n",
        )?;
        assert_eq!(config.forest.impurity, Impurity::Gini);
        assert_eq!(config.training.score, ScoreMode::KFold);
        assert!(config.validate()?.is_empty());

        let config = RfConfig::from_toml("[training]\nscore = \"valid\"\n")?;
        assert_eq!(config.training.score, ScoreMode::Valid);
        assert_eq!(config.validate()?.len(), 1);

        let mut config = RfConfig::default();
        config.training.score = ScoreMode::KFold;
        config.training.k_folds = 1;
        assert!(config.validate().is_err());

        let mut config = RfConfig::default();
        config.training.combine_ratio = 1.5;
        assert!(config.validate().is_err());
        Ok(())
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            RfConfig::from_toml("[forest]\nnum_trees = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
