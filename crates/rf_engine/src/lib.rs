//! Out-of-core random forest engine
//!
//! Trains and runs a random forest whose dataset, bootstrap subsets and
//! trees live on a small flash filesystem. Only one subset and one tree are
//! held in RAM at a time.

pub mod bootstrap;
pub mod config;
pub mod dataset;
pub mod deterministic;
pub mod errors;
pub mod flash;
pub mod forest;
pub mod induction;
pub mod metrics;
pub mod node;
pub mod node_predictor;
pub mod sample;
pub mod store;
pub mod training;
pub mod tree;

pub use config::RfConfig;
pub use deterministic::LcgRng;
pub use errors::{ForestError, Result};
pub use flash::{DirFs, FlashFs, MemFs, OpenMode, SharedFs};
pub use forest::{ForestStats, RandomForest, UNKNOWN_LABEL};
pub use metrics::{Metric, MetricFlags, Scores};
pub use node::PackedNode;
pub use sample::Sample;
pub use store::{DataRole, RestoreHook, SampleMap, SampleStore};
pub use training::{StopReason, TrainingReport};
pub use tree::PackedTree;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
