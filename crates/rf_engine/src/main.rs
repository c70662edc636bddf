//! rf-train CLI
//!
//! Ingests a discretized CSV into a flash directory, trains a forest with the
//! adaptive search and writes a manifest of the resulting tree files.

use anyhow::{Context, Result};
use clap::Parser;
use rf_engine::forest::ForestStats;
use rf_engine::tree::tree_path;
use rf_engine::{DirFs, RandomForest, RfConfig, Scores, TrainingReport};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "rf-train")]
#[command(author = "rf-engine Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Out-of-core random forest trainer", long_about = None)]
struct Args {
    /// Directory standing in for the flash filesystem
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// CSV dataset (label first, then 2-bit feature codes) to ingest
    #[arg(short, long)]
    csv: Option<PathBuf>,

    /// Feature count; 0 infers it from the first CSV row
    #[arg(long)]
    features: Option<u16>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of trees
    #[arg(long)]
    trees: Option<u16>,

    /// Search epochs
    #[arg(long)]
    epochs: Option<u16>,

    /// Run every epoch even without improvement
    #[arg(long)]
    no_early_stop: bool,

    /// Random seed
    #[arg(long)]
    seed: Option<i64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct TreeEntry {
    index: u8,
    path: String,
    bytes: usize,
    blake3: String,
}

#[derive(Serialize)]
struct Manifest {
    version: &'static str,
    num_features: u16,
    num_labels: u8,
    unity_threshold: f32,
    trees: Vec<TreeEntry>,
    stats: ForestStats,
    training: TrainingReport,
    validation: Option<Scores>,
    test: Scores,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RfConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RfConfig::default(),
    };
    let overridden = config.apply_env_overrides();
    if let Some(root) = &args.root {
        config.storage.root = root.clone();
    }
    if let Some(features) = args.features {
        config.storage.num_features = features;
    }
    if let Some(trees) = args.trees {
        config.forest.num_trees = trees;
    }
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(seed) = args.seed {
        config.training.random_seed = seed;
    }
    if args.no_early_stop {
        config.training.early_stop = false;
    }

    // Setup logging; RUST_LOG takes precedence over the config level
    let level = if args.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("rf-train v{}", env!("CARGO_PKG_VERSION"));
    for key in overridden {
        info!("Environment override: {}", key);
    }

    std::fs::create_dir_all(&config.storage.root).with_context(|| {
        format!("Failed to create flash root {}", config.storage.root.display())
    })?;
    let fs = DirFs::new(&config.storage.root).context("Failed to open flash root")?;

    if let Some(csv) = &args.csv {
        let target = fs.resolve(&config.storage.csv_file);
        info!("Copying {} to {}", csv.display(), target.display());
        std::fs::copy(csv, &target)
            .with_context(|| format!("Failed to copy dataset {}", csv.display()))?;
    }

    let epochs = config.training.epochs;
    let early_stop = config.training.early_stop;
    let mut forest = RandomForest::new(Arc::new(fs.clone()), config)
        .context("Failed to prepare forest")?;
    info!(
        "Dataset: {} features, {} labels, {} training samples",
        forest.num_features(),
        forest.num_labels(),
        forest.train_ids().len()
    );

    let report = forest
        .training(epochs, early_stop)
        .context("Training failed")?;
    let validation = forest.validation_scores()?;
    let test = forest.test_scores()?;
    let stats = forest.forest_stats();

    info!(
        "Best params: min_split={} max_depth={} ({:?} after {} epochs)",
        report.params.min_split, report.params.max_depth, report.stop, report.epochs_run
    );
    info!(
        "Held-out {:.4} ({:?}), gap {:.4}",
        report.best.held_out, forest.config().training.score, report.best.gap
    );
    if let Some(valid) = &validation {
        info!("Validation accuracy {:.4}, f1 {:.4}", valid.accuracy, valid.f1);
    }
    info!(
        "Test accuracy {:.4}, precision {:.4}, recall {:.4}, f1 {:.4}",
        test.accuracy, test.precision, test.recall, test.f1
    );
    info!(
        "Forest: {} trees, {} nodes, {} leaves, depth {}",
        stats.trees, stats.total_nodes, stats.total_leaves, stats.max_depth
    );

    let mut trees = Vec::new();
    for index in 0..forest.tree_count() as u8 {
        let path = tree_path(index)?;
        let host = fs.resolve(&path);
        if !host.exists() {
            warn!("Tree {} missing from flash", index);
            continue;
        }
        let bytes = std::fs::read(&host)
            .with_context(|| format!("Failed to read {}", host.display()))?;
        trees.push(TreeEntry {
            index,
            blake3: hex::encode(blake3::hash(&bytes).as_bytes()),
            bytes: bytes.len(),
            path,
        });
    }

    let manifest = Manifest {
        version: rf_engine::VERSION,
        num_features: forest.num_features(),
        num_labels: forest.num_labels(),
        unity_threshold: forest.unity_threshold(),
        trees,
        stats,
        training: report,
        validation,
        test,
    };
    let manifest_path = fs.root().join("forest_manifest.json");
    let json = serde_json::to_string_pretty(&manifest).context("Failed to serialize manifest")?;
    std::fs::write(&manifest_path, json).context("Failed to write manifest")?;

    info!("✓ Training completed successfully");
    info!("  Manifest: {}", manifest_path.display());

    Ok(())
}
