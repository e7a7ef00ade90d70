//! Feature-presorted partition tracking for the grow-from-root sampler.
//!
//! Each feature is arg-sorted once per dataset ([`PresortContainer`]); every
//! new tree then clones those orderings into a [`SortedPartition`] which
//! keeps, for every live node and every feature, the node's observations in
//! ascending feature order. Splitting sifts each feature's ordering stably
//! into a left block and a right block, which preserves per-feature
//! sortedness inside both children.

use crate::data::Dataset;
use crate::partition::{NodeObservations, SampleNodeMap};
use crate::split::SplitRule;
use crate::tree::Tree;

/// Stable argsort of one covariate column over the whole dataset. Computed
/// once per run and shared by every tree.
#[derive(Debug, Clone)]
pub struct FeaturePresort {
    sort_indices: Vec<usize>,
}

impl FeaturePresort {
    /// Arg-sorts column `feature` of the dataset.
    pub fn new(data: &Dataset, feature: usize) -> Self {
        let column: Vec<f64> = (0..data.num_observations())
            .map(|i| data.covariate(i, feature))
            .collect();
        Self {
            sort_indices: crate::math::stable_argsort(&column),
        }
    }
}

/// One [`FeaturePresort`] per feature.
#[derive(Debug, Clone)]
pub struct PresortContainer {
    presorts: Vec<FeaturePresort>,
}

impl PresortContainer {
    /// Presorts every feature of the dataset.
    pub fn new(data: &Dataset) -> Self {
        Self {
            presorts: (0..data.num_features())
                .map(|j| FeaturePresort::new(data, j))
                .collect(),
        }
    }
}

/// Per-feature sorted partition of the observations for one tree.
///
/// Node ranges (`begin`, `length`) are shared across features because a
/// node holds the same observation set under every viewing feature; only
/// the order inside the range differs per feature.
#[derive(Debug, Clone)]
pub struct SortedPartition {
    feature_indices: Vec<Vec<usize>>,
    node_begin: Vec<usize>,
    node_length: Vec<usize>,
    num_features: usize,
}

impl SortedPartition {
    /// Clones the dataset-wide presorts and places all observations in the
    /// root.
    pub fn new(container: &PresortContainer, data: &Dataset) -> Self {
        let n = data.num_observations();
        Self {
            feature_indices: container
                .presorts
                .iter()
                .map(|p| p.sort_indices.clone())
                .collect(),
            node_begin: vec![0],
            node_length: vec![n],
            num_features: data.num_features(),
        }
    }

    /// First position of `node`'s observations within every feature order.
    #[inline(always)]
    pub fn node_begin(&self, node: usize) -> usize {
        self.node_begin[node]
    }

    /// One past the last position of `node`'s observations.
    #[inline(always)]
    pub fn node_end(&self, node: usize) -> usize {
        self.node_begin[node] + self.node_length[node]
    }

    /// Number of observations in `node`.
    #[inline(always)]
    pub fn node_size(&self, node: usize) -> usize {
        self.node_length[node]
    }

    /// Observation at sorted position `pos` under `feature`'s ordering.
    #[inline(always)]
    pub fn sort_index(&self, pos: usize, feature: usize) -> usize {
        self.feature_indices[feature][pos]
    }

    /// The slice of `feature`'s ordering covering `node`.
    pub fn node_indices(&self, node: usize, feature: usize) -> &[usize] {
        &self.feature_indices[feature][self.node_begin(node)..self.node_end(node)]
    }

    fn ensure_slot(&mut self, node: usize) {
        if node >= self.node_begin.len() {
            self.node_begin.resize(node + 1, 0);
            self.node_length.resize(node + 1, 0);
        }
    }

    /// Applies a committed split. For every feature the node's range is
    /// sifted stably into observations satisfying the rule followed by the
    /// rest; the two child ranges are then recorded under the tree's ids.
    /// Returns the size of the left child.
    pub fn apply_split(
        &mut self,
        data: &Dataset,
        node: usize,
        left_id: usize,
        right_id: usize,
        feature_split: usize,
        rule: &SplitRule,
    ) -> usize {
        let begin = self.node_begin[node];
        let end = self.node_end(node);

        let mut left_block: Vec<usize> = Vec::with_capacity(end - begin);
        let mut right_block: Vec<usize> = Vec::with_capacity(end - begin);
        for ordering in self.feature_indices.iter_mut() {
            left_block.clear();
            right_block.clear();
            for &obs in &ordering[begin..end] {
                // The rule is always evaluated against the split feature,
                // not the feature whose ordering is being sifted.
                if rule.goes_left(data.covariate(obs, feature_split)) {
                    left_block.push(obs);
                } else {
                    right_block.push(obs);
                }
            }
            ordering[begin..begin + left_block.len()].copy_from_slice(&left_block);
            ordering[begin + left_block.len()..end].copy_from_slice(&right_block);
        }
        let num_left = left_block.len();

        self.ensure_slot(left_id);
        self.ensure_slot(right_id);
        self.node_begin[left_id] = begin;
        self.node_length[left_id] = num_left;
        self.node_begin[right_id] = begin + num_left;
        self.node_length[right_id] = end - begin - num_left;
        num_left
    }

    /// Writes the current leaf of every observation in `node` into the
    /// sample-node map.
    pub fn update_observation_mapping(
        &self,
        node: usize,
        tree_id: usize,
        map: &mut SampleNodeMap,
    ) {
        for pos in self.node_begin(node)..self.node_end(node) {
            map.set_node_id(tree_id, self.feature_indices[0][pos], node);
        }
    }

    /// Refreshes the sample-node map for every live leaf of `tree`.
    pub fn refresh_leaf_map(&self, tree: &Tree, tree_id: usize, map: &mut SampleNodeMap) {
        for leaf in tree.leaves() {
            self.update_observation_mapping(leaf, tree_id, map);
        }
    }
}

impl NodeObservations for SortedPartition {
    fn node_observations(&self, node: usize) -> &[usize] {
        self.node_indices(node, 0)
    }
}
