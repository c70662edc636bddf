//! Error types for the random forest engine
//!
//! Lower layers (store, tree, predictor) report what went wrong with enough
//! context to diagnose it; the forest orchestrator decides whether to retry,
//! restore or roll back.

use crate::store::DataRole;
use thiserror::Error;

/// Errors raised by the sample store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt data file {path}: {reason}")]
    Format { path: String, reason: String },

    #[error("{0} data is not loaded")]
    NotLoaded(DataRole),

    #[error("subset data has no owning tree index")]
    MissingTreeIndex,

    #[error("feature count mismatch in {path}: expected {expected}, found {found}")]
    FeatureCount {
        path: String,
        expected: u16,
        found: u16,
    },

    #[error("no free sample ids below {max_id} (have {have}, need {need})")]
    IdSpaceExhausted { max_id: u16, have: usize, need: usize },

    #[error("no valid rows in {path}")]
    EmptyCsv { path: String },
}

/// Errors raised while saving or loading a packed tree
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("{op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("bad tree magic in {path}: 0x{found:08X}")]
    BadMagic { path: String, found: u32 },

    #[error("node count {count} in {path} is outside 1..={max}")]
    NodeCount { path: String, count: u32, max: usize },

    #[error("tree has no index assigned")]
    Unassigned,

    #[error("tree {0} has no nodes")]
    Empty(u8),
}

/// Errors raised by tree induction
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("cannot induce a tree from an empty sample set")]
    NoSamples,

    #[error("tree outgrew the packed node capacity ({limit} nodes)")]
    NodeCapacity { limit: usize },

    #[error("feature {0} does not fit the packed node format")]
    FeatureOutOfRange(usize),
}

/// Errors raised by the node-count predictor
#[derive(Debug, Error)]
pub enum PredictorError {
    #[error("{op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt predictor file {path}: {reason}")]
    Format { path: String, reason: String },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Errors surfaced by the forest orchestrator
#[derive(Debug, Error)]
pub enum ForestError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Predictor(#[from] PredictorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no dataset found: neither {csv} nor {base} exists")]
    NoDataset { csv: String, base: String },

    #[error("unusable dataset: {0}")]
    InvalidDataset(String),

    #[error("no tree at index {0}")]
    NoSuchTree(usize),
}

/// Result type for forest operations
pub type Result<T> = std::result::Result<T, ForestError>;
