//! Policy engine: the classifier that picks actions in autonomous mode.
//!
//! The control loop only sees the [`Policy`] trait. The concrete policy is a
//! decision tree grown once at start-up from two CSV datasets.

pub mod dataset;
pub mod tree;

pub use dataset::Dataset;
pub use tree::{DecisionTree, TreeParams};

use tracing::info;

use crate::config::PolicyConfig;
use crate::control::snapshot::Features;

/// Read-only action selector
pub trait Policy: Send + Sync {
    /// Raw action output for a feature vector
    fn predict(&self, features: &Features) -> f64;

    /// Human-readable dump of the model
    fn describe(&self) -> String {
        String::new()
    }
}

/// Load both datasets and train the tree
pub fn build_policy(config: &PolicyConfig) -> Result<DecisionTree, PolicyError> {
    info!(
        states = %config.states_csv.display(),
        actions = %config.actions_csv.display(),
        "Building decision tree policy"
    );

    let dataset = Dataset::load(&config.states_csv, &config.actions_csv, config.has_headers)?;
    let tree = DecisionTree::train(&dataset, &TreeParams::from(config))?;

    info!(
        samples = dataset.len(),
        depth = tree.depth(),
        leaves = tree.leaf_count(),
        "Decision tree policy ready"
    );
    Ok(tree)
}

/// Policy construction failures
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("failed to read {dataset} dataset: {source}")]
    Read {
        dataset: &'static str,
        #[source]
        source: csv::Error,
    },

    #[error("{dataset} row {row}: {value:?} is not a number")]
    BadValue {
        dataset: &'static str,
        row: usize,
        value: String,
    },

    #[error("{dataset} row {row} has {len} columns, expected {expected}")]
    RowWidth {
        dataset: &'static str,
        row: usize,
        len: usize,
        expected: usize,
    },

    #[error("actions row {row}: label {value} is not an action in 0..6")]
    BadLabel { row: usize, value: f64 },

    #[error("{states} state rows but {actions} action rows")]
    RowCountMismatch { states: usize, actions: usize },

    #[error("training dataset is empty")]
    EmptyDataset,
}
