//! Stochastic grow-from-root sampling of tree structures.
//!
//! Each sweep rebuilds every tree from a root containing all observations.
//! Nodes are processed breadth-first: for each node the sampler enumerates
//! every candidate cutpoint of every feature, scores each by its conjugate
//! log marginal likelihood, appends a prior-corrected "no split" entry, and
//! draws one option from the normalized weights. Committed splits sift the
//! feature-presorted partition and enqueue both children.

use std::collections::VecDeque;

use rand::distributions::WeightedIndex;
use rand::Rng;
use rand_distr::Distribution;

use crate::cutpoint::CutpointGrid;
use crate::data::{Dataset, FeatureType};
use crate::error::{Error, Result};
use crate::math::normalize_log_weights;
use crate::partition::SampleNodeMap;
use crate::presort::{PresortContainer, SortedPartition};
use crate::priors::TreePrior;
use crate::split::SplitRule;
use crate::suffstat::{LeafModel, LeafSuffStat};
use crate::tree::{Tree, ROOT_ID};

/// Grow-from-root sampler state for the whole ensemble.
///
/// The dataset-wide feature presorts are computed once; each tree update
/// clones them into a fresh [`SortedPartition`], which is discarded when
/// the next tree is processed.
pub struct GrowFromRootSampler {
    presorts: PresortContainer,
    partition: SortedPartition,
    leaf_map: SampleNodeMap,
    grid: CutpointGrid,
}

impl GrowFromRootSampler {
    /// Presorts the dataset and initializes per-tree leaf maps.
    pub fn new(data: &Dataset, num_trees: usize, cutpoint_grid_size: usize) -> Self {
        let presorts = PresortContainer::new(data);
        let partition = SortedPartition::new(&presorts, data);
        Self {
            presorts,
            partition,
            leaf_map: SampleNodeMap::new(num_trees, data.num_observations()),
            grid: CutpointGrid::new(cutpoint_grid_size),
        }
    }

    /// Current leaf of `observation` in tree `tree_num`.
    pub fn node_id(&self, tree_num: usize, observation: usize) -> usize {
        self.leaf_map.node_id(tree_num, observation)
    }

    /// The sorted partition of the tree currently being grown.
    pub fn partition(&self) -> &SortedPartition {
        &self.partition
    }

    /// Rebuilds the sorted partition from the presorts and sends every
    /// observation of `tree_num` back to the root, ahead of a fresh grow.
    pub fn reset_for_tree(&mut self, data: &Dataset, tree_num: usize) {
        self.partition = SortedPartition::new(&self.presorts, data);
        self.leaf_map.assign_all_to_root(tree_num);
    }

    /// Grows `tree` from the root and refreshes its leaf map. The tree must
    /// have been reset to a root-only leaf beforehand.
    pub fn sample_tree<M, R>(
        &mut self,
        tree: &mut Tree,
        data: &Dataset,
        model: &M,
        tree_prior: &TreePrior,
        sigma_sq: f64,
        tree_num: usize,
        rng: &mut R,
    ) -> Result<()>
    where
        M: LeafModel,
        R: Rng,
    {
        let mut queue: VecDeque<usize> = VecDeque::from([ROOT_ID]);
        while let Some(node) = queue.pop_front() {
            self.sample_split_rule(
                tree, data, model, tree_prior, sigma_sq, tree_num, node, &mut queue, rng,
            )?;
        }
        self.partition
            .refresh_leaf_map(tree, tree_num, &mut self.leaf_map);
        Ok(())
    }

    /// Evaluates every candidate cutpoint at `node` and draws a split or
    /// the no-split option.
    #[allow(clippy::too_many_arguments)]
    fn sample_split_rule<M, R>(
        &mut self,
        tree: &mut Tree,
        data: &Dataset,
        model: &M,
        tree_prior: &TreePrior,
        sigma_sq: f64,
        tree_num: usize,
        node: usize,
        queue: &mut VecDeque<usize>,
        rng: &mut R,
    ) -> Result<()>
    where
        M: LeafModel,
        R: Rng,
    {
        let begin = self.partition.node_begin(node);
        let end = self.partition.node_end(node);

        // Sufficient statistic of the whole node.
        let mut parent_stat = model.zero_stat();
        for pos in begin..end {
            parent_stat.increment(data, self.partition.sort_index(pos, 0));
        }
        let no_split_ml = model.log_ml(&parent_stat, sigma_sq);

        self.grid.compute(data, &self.partition, node);

        let mut log_evaluations: Vec<f64> = Vec::new();
        let mut cut_features: Vec<usize> = Vec::new();
        let mut cut_indices: Vec<usize> = Vec::new();
        let min_leaf = tree_prior.min_samples_leaf;

        for feature in 0..data.num_features() {
            // Left statistics accumulate bin by bin; the right side is the
            // sibling complement, so each candidate costs one bin sweep.
            let mut left_stat = model.zero_stat();
            for cut in 0..self.grid.num_cutpoints(feature) {
                let bin = self.grid.bin(feature, cut);
                for k in 0..bin.length {
                    left_stat.increment(data, self.partition.sort_index(bin.begin + k, feature));
                }
                let right_stat = M::Stat::subtract(&parent_stat, &left_stat);
                if left_stat.n() >= min_leaf && right_stat.n() >= min_leaf {
                    log_evaluations.push(
                        model.log_ml(&left_stat, sigma_sq) + model.log_ml(&right_stat, sigma_sq),
                    );
                    cut_features.push(feature);
                    cut_indices.push(cut);
                }
            }
        }

        // No-split entry, corrected for the depth prior and the number of
        // candidates so the normalized weights form the posterior over the
        // split/no-split choice. The multiplicity term is omitted when no
        // candidate is valid.
        let num_valid = log_evaluations.len();
        let depth = tree.node_depth(node);
        let mut no_split_adjustment =
            ((1.0 + depth as f64).powf(tree_prior.beta) / tree_prior.alpha - 1.0).ln();
        if num_valid > 0 {
            no_split_adjustment += (num_valid as f64).ln();
        }
        log_evaluations.push(no_split_ml + no_split_adjustment);

        let weights = normalize_log_weights(&log_evaluations);
        let split_dist = WeightedIndex::new(&weights).map_err(|e| Error::Numerical {
            context: format!("tree {tree_num}, node {node}: degenerate split weights ({e})"),
        })?;
        let chosen = split_dist.sample(rng);
        if chosen == num_valid {
            // No split: the node stays a leaf.
            return Ok(());
        }

        let feature = cut_features[chosen];
        let cut = cut_indices[chosen];
        let rule = match data.feature_type(feature) {
            FeatureType::Numeric | FeatureType::OrderedCategorical => {
                SplitRule::Numeric(self.grid.cutpoint_value(feature, cut))
            }
            FeatureType::UnorderedCategorical => {
                SplitRule::Categories(self.grid.category_subset(feature, cut))
            }
        };

        let (left, right) = tree
            .expand_node(node, feature, rule.clone())
            .map_err(|e| Error::Invariant {
                tree: tree_num,
                node,
                message: e.to_string(),
            })?;
        self.partition
            .apply_split(data, node, left, right, feature, &rule);
        queue.push_back(left);
        queue.push_back(right);
        Ok(())
    }
}
