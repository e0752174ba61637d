//! Decision tree classifier

use std::fmt::Write;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::PolicyConfig;
use crate::control::dispatch::ACTION_COUNT;
use crate::control::snapshot::{Features, FEATURE_COUNT, FEATURE_LAYOUT};

use super::{Dataset, Policy, PolicyError};

const LABELS: usize = ACTION_COUNT as usize;

/// Impurity gains below this are treated as no improvement
const MIN_GAIN: f64 = 1e-12;

type Counts = [usize; LABELS];

/// Growth limits for the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_split: usize,
    /// Seeds the feature order used to break ties between equal splits
    pub seed: u64,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_split: 2,
            seed: 0,
        }
    }
}

impl From<&PolicyConfig> for TreeParams {
    fn from(config: &PolicyConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            min_split: config.min_split,
            seed: config.seed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf {
        label: usize,
        samples: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        /// Taken when `feature <= threshold`
        below: Box<Node>,
        above: Box<Node>,
    },
}

#[derive(Debug, Clone, Copy)]
struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Binary classification tree over the policy feature vector
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTree {
    root: Node,
}

impl DecisionTree {
    pub fn train(dataset: &Dataset, params: &TreeParams) -> Result<Self, PolicyError> {
        if dataset.is_empty() {
            return Err(PolicyError::EmptyDataset);
        }
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let indices: Vec<usize> = (0..dataset.len()).collect();
        let root = grow(dataset, indices, 0, params, &mut rng);
        Ok(Self { root })
    }

    pub fn classify(&self, features: &Features) -> usize {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { label, .. } => return *label,
                Node::Split {
                    feature,
                    threshold,
                    below,
                    above,
                } => {
                    node = if features[*feature] <= *threshold {
                        below
                    } else {
                        above
                    };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(node: &Node) -> usize {
            match node {
                Node::Leaf { .. } => 0,
                Node::Split { below, above, .. } => 1 + walk(below).max(walk(above)),
            }
        }
        walk(&self.root)
    }

    pub fn leaf_count(&self) -> usize {
        fn walk(node: &Node) -> usize {
            match node {
                Node::Leaf { .. } => 1,
                Node::Split { below, above, .. } => walk(below) + walk(above),
            }
        }
        walk(&self.root)
    }
}

impl Policy for DecisionTree {
    fn predict(&self, features: &Features) -> f64 {
        self.classify(features) as f64
    }

    fn describe(&self) -> String {
        let mut out = String::new();
        render(&self.root, 0, &mut out);
        out
    }
}

fn render(node: &Node, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    match node {
        Node::Leaf { label, samples } => {
            let _ = writeln!(out, "{pad}action {label} ({samples} samples)");
        }
        Node::Split {
            feature,
            threshold,
            below,
            above,
        } => {
            let name = FEATURE_LAYOUT[*feature];
            let _ = writeln!(out, "{pad}if {name} <= {threshold}:");
            render(below, indent + 1, out);
            let _ = writeln!(out, "{pad}else:");
            render(above, indent + 1, out);
        }
    }
}

fn grow(
    dataset: &Dataset,
    indices: Vec<usize>,
    depth: usize,
    params: &TreeParams,
    rng: &mut ChaCha8Rng,
) -> Node {
    let counts = count_labels(dataset, &indices);
    let leaf = Node::Leaf {
        label: majority(&counts),
        samples: indices.len(),
    };

    let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
    let too_small = indices.len() < params.min_split.max(2);
    let too_deep = params.max_depth.is_some_and(|max| depth >= max);
    if pure || too_small || too_deep {
        return leaf;
    }

    let Some(split) = best_split(dataset, &indices, &counts, rng) else {
        return leaf;
    };

    let (below, above): (Vec<usize>, Vec<usize>) = indices
        .into_iter()
        .partition(|&i| dataset.features[i][split.feature] <= split.threshold);
    if below.is_empty() || above.is_empty() {
        return leaf;
    }

    Node::Split {
        feature: split.feature,
        threshold: split.threshold,
        below: Box::new(grow(dataset, below, depth + 1, params, rng)),
        above: Box::new(grow(dataset, above, depth + 1, params, rng)),
    }
}

fn best_split(
    dataset: &Dataset,
    indices: &[usize],
    counts: &Counts,
    rng: &mut ChaCha8Rng,
) -> Option<Split> {
    let total = indices.len();
    let parent = gini(counts, total);

    let mut order: Vec<usize> = (0..FEATURE_COUNT).collect();
    order.shuffle(rng);

    let mut best: Option<Split> = None;
    for feature in order {
        let mut column: Vec<(f64, usize)> = indices
            .iter()
            .map(|&i| (dataset.features[i][feature], dataset.labels[i]))
            .collect();
        column.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut below: Counts = [0; LABELS];
        let mut above: Counts = *counts;
        for k in 0..column.len() - 1 {
            let (value, label) = column[k];
            below[label] += 1;
            above[label] -= 1;

            let next = column[k + 1].0;
            if next <= value {
                continue;
            }

            let n_below = k + 1;
            let n_above = total - n_below;
            let weighted = (n_below as f64 * gini(&below, n_below)
                + n_above as f64 * gini(&above, n_above))
                / total as f64;
            let gain = parent - weighted;

            if gain > MIN_GAIN && best.map_or(true, |b| gain > b.gain + MIN_GAIN) {
                let Some(threshold) = threshold_between(value, next) else {
                    continue;
                };
                best = Some(Split {
                    feature,
                    threshold,
                    gain,
                });
            }
        }
    }
    best
}

/// Midpoint of two adjacent sorted values that still separates them. Falls
/// back to `value` when the midpoint rounds onto `next`.
fn threshold_between(value: f64, next: f64) -> Option<f64> {
    let mid = value + (next - value) / 2.0;
    [mid, value]
        .into_iter()
        .find(|t| t.is_finite() && value <= *t && *t < next)
}

fn count_labels(dataset: &Dataset, indices: &[usize]) -> Counts {
    let mut counts = [0; LABELS];
    for &i in indices {
        counts[dataset.labels[i]] += 1;
    }
    counts
}

/// Most frequent label; ties go to the lowest
fn majority(counts: &Counts) -> usize {
    let mut best = 0;
    for (label, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = label;
        }
    }
    best
}

fn gini(counts: &Counts, total: usize) -> f64 {
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
