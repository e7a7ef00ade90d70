//! Metropolis-Hastings grow/prune sampling of tree structures.
//!
//! One step proposes either growing a uniformly chosen leaf with a uniform
//! feature and threshold, or pruning a uniformly chosen leaf parent, and
//! accepts with the conjugate Metropolis-Hastings ratio. The sampler owns
//! one [`UnsortedPartition`] per tree, mutated incrementally across sweeps,
//! plus the observation-to-leaf map for the whole ensemble.

use rand::Rng;

use crate::data::Dataset;
use crate::error::{Error, Result};
use crate::partition::{NodeObservations, SampleNodeMap, UnsortedPartition};
use crate::priors::TreePrior;
use crate::split::SplitRule;
use crate::suffstat::{LeafModel, LeafSuffStat};
use crate::tree::Tree;

/// Grow/prune sampler state for the whole ensemble.
pub struct McmcTreeSampler {
    partitions: Vec<UnsortedPartition>,
    leaf_map: SampleNodeMap,
}

impl McmcTreeSampler {
    /// Creates per-tree partitions with every observation in each root.
    pub fn new(num_trees: usize, num_observations: usize) -> Self {
        Self {
            partitions: (0..num_trees)
                .map(|_| UnsortedPartition::new(num_observations))
                .collect(),
            leaf_map: SampleNodeMap::new(num_trees, num_observations),
        }
    }

    /// Current leaf of `observation` in tree `tree_num`.
    pub fn node_id(&self, tree_num: usize, observation: usize) -> usize {
        self.leaf_map.node_id(tree_num, observation)
    }

    /// The partition tracker of one tree.
    pub fn partition(&self, tree_num: usize) -> &UnsortedPartition {
        &self.partitions[tree_num]
    }

    /// Runs one Metropolis-Hastings step on `tree`. On rejection or on a
    /// degenerate proposal the tree is left unchanged and the chain remains
    /// valid.
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
        let min_leaf = tree_prior.min_samples_leaf;
        let partition = &self.partitions[tree_num];
        let grow_possible = tree
            .leaves()
            .iter()
            .any(|&leaf| partition.node_size(leaf) > 2 * min_leaf);
        let prune_possible = tree.num_valid_nodes() > 1;

        let (do_grow, prob_grow_old) = match (grow_possible, prune_possible) {
            (true, true) => (rng.gen::<f64>() < 0.5, 0.5),
            (true, false) => (true, 1.0),
            (false, true) => (false, 0.0),
            (false, false) => return Err(Error::NothingToDo { tree: tree_num }),
        };

        if do_grow {
            self.grow(
                tree,
                data,
                model,
                tree_prior,
                sigma_sq,
                tree_num,
                prob_grow_old,
                rng,
            )
        } else {
            self.prune(tree, data, model, tree_prior, sigma_sq, tree_num, rng)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn grow<M, R>(
        &mut self,
        tree: &mut Tree,
        data: &Dataset,
        model: &M,
        tree_prior: &TreePrior,
        sigma_sq: f64,
        tree_num: usize,
        prob_grow_old: f64,
        rng: &mut R,
    ) -> Result<()>
    where
        M: LeafModel,
        R: Rng,
    {
        // Choose a leaf and a split variable uniformly at random.
        let leaves = tree.leaves();
        let leaf = leaves[rng.gen_range(0..leaves.len())];
        let depth = tree.node_depth(leaf);
        let feature = rng.gen_range(0..data.num_features());

        // Determine the range of possible cutpoints. A feature that is
        // constant within the leaf aborts the move; the chain continues.
        let (var_min, var_max) = self.feature_range(data, tree_num, leaf, feature);
        if var_max <= var_min {
            return Ok(());
        }
        let rule = SplitRule::Numeric(rng.gen_range(var_min..var_max));

        // One pass over the leaf for parent, left, and right statistics.
        let (split_ml, no_split_ml, left_n, right_n) =
            self.evaluate_split(data, model, sigma_sq, tree_num, leaf, feature, &rule);

        // Structure prior at the grown node and its two new children.
        let pg = tree_prior.split_prob(depth);
        let pg_left = tree_prior.split_prob(depth + 1);
        let pg_right = tree_prior.split_prob(depth + 1);

        // Probability of proposing the reverse prune from the grown tree:
        // 1/2 when a further grow would also be available there.
        let further_grow = self
            .nodes_non_constant_after_split(data, tree_num, leaf, feature, &rule)
            && (left_n >= 2 * tree_prior.min_samples_leaf
                || right_n >= 2 * tree_prior.min_samples_leaf);
        let prob_prune_new: f64 = if further_grow { 0.5 } else { 1.0 };

        let num_leaves = leaves.len() as f64;
        let num_leaf_parents_new = tree.leaf_parents().len() as f64 + 1.0;
        let p_leaf = 1.0 / num_leaves;
        let p_leaf_parent = 1.0 / num_leaf_parents_new;

        let log_mh_ratio = pg.ln() + (1.0 - pg_left).ln() + (1.0 - pg_right).ln()
            - (1.0 - pg).ln()
            + prob_prune_new.ln()
            + p_leaf_parent.ln()
            - prob_grow_old.ln()
            - p_leaf.ln()
            + split_ml
            - no_split_ml;
        let log_mh_ratio = log_mh_ratio.min(0.0);

        if rng.gen::<f64>().ln() <= log_mh_ratio {
            self.add_split(tree, data, tree_num, leaf, feature, rule)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn prune<M, R>(
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
        // Choose a leaf parent uniformly at random; both of its children
        // are leaves whose ranges the tracker already holds.
        let leaf_parents = tree.leaf_parents();
        let node = leaf_parents[rng.gen_range(0..leaf_parents.len())];
        let depth = tree.node_depth(node);
        let left = tree
            .left_child(node)
            .expect("leaf parent has a left child");
        let right = tree
            .right_child(node)
            .expect("leaf parent has a right child");

        let (split_ml, no_split_ml) =
            self.evaluate_children(data, model, sigma_sq, tree_num, left, right);

        let pg = tree_prior.split_prob(depth);
        let pg_left = tree_prior.split_prob(depth + 1);
        let pg_right = tree_prior.split_prob(depth + 1);

        // Probability of proposing the reverse grow from the pruned tree:
        // 1/2 when pruning would also remain available there (the pruned
        // tree is not just a root).
        let prob_grow_new: f64 = if tree.num_valid_nodes() > 3 { 0.5 } else { 1.0 };
        // Probability that this step chose prune on the current tree: a
        // grow counts as available only when both children being merged
        // contain a non-constant feature.
        let non_constant_left = self.node_non_constant(data, tree_num, left);
        let non_constant_right = self.node_non_constant(data, tree_num, right);
        let prob_prune_old: f64 = if non_constant_left && non_constant_right {
            0.5
        } else {
            1.0
        };

        let num_leaves = tree.num_leaves() as f64;
        let p_leaf_new = 1.0 / (num_leaves - 1.0);
        let p_leaf_parent_old = 1.0 / leaf_parents.len() as f64;

        let log_mh_ratio = (1.0 - pg).ln() - pg.ln() - (1.0 - pg_left).ln()
            - (1.0 - pg_right).ln()
            + prob_grow_new.ln()
            + p_leaf_new.ln()
            - prob_prune_old.ln()
            - p_leaf_parent_old.ln()
            + no_split_ml
            - split_ml;
        let log_mh_ratio = log_mh_ratio.min(0.0);

        if rng.gen::<f64>().ln() <= log_mh_ratio {
            self.remove_split(tree, tree_num, node)?;
        }
        Ok(())
    }

    /// Minimum and maximum of one feature over the observations in a node.
    pub fn feature_range(
        &self,
        data: &Dataset,
        tree_num: usize,
        node: usize,
        feature: usize,
    ) -> (f64, f64) {
        let mut var_min = f64::INFINITY;
        let mut var_max = f64::NEG_INFINITY;
        for &obs in self.partitions[tree_num].node_observations(node) {
            let value = data.covariate(obs, feature);
            if value < var_min {
                var_min = value;
            }
            if value > var_max {
                var_max = value;
            }
        }
        (var_min, var_max)
    }

    /// Whether any feature takes more than one value inside a node, i.e.
    /// whether a grow move is available from that node.
    fn node_non_constant(&self, data: &Dataset, tree_num: usize, node: usize) -> bool {
        for feature in 0..data.num_features() {
            let (var_min, var_max) = self.feature_range(data, tree_num, node, feature);
            if var_max > var_min {
                return true;
            }
        }
        false
    }

    /// Whether both sides of the proposed split would contain at least one
    /// non-constant feature, i.e. whether a further grow would be possible
    /// in the new tree.
    fn nodes_non_constant_after_split(
        &self,
        data: &Dataset,
        tree_num: usize,
        node: usize,
        feature_split: usize,
        rule: &SplitRule,
    ) -> bool {
        let observations = self.partitions[tree_num].node_observations(node);
        for j in 0..data.num_features() {
            let mut left_min = f64::INFINITY;
            let mut left_max = f64::NEG_INFINITY;
            let mut right_min = f64::INFINITY;
            let mut right_max = f64::NEG_INFINITY;
            for &obs in observations {
                let value = data.covariate(obs, j);
                if rule.goes_left(data.covariate(obs, feature_split)) {
                    left_min = left_min.min(value);
                    left_max = left_max.max(value);
                } else {
                    right_min = right_min.min(value);
                    right_max = right_max.max(value);
                }
            }
            if left_max > left_min && right_max > right_min {
                return true;
            }
        }
        false
    }

    /// One pass over a leaf computing parent, left, and right statistics
    /// for a proposed split. Returns `(split_ml, no_split_ml, left_n,
    /// right_n)`.
    fn evaluate_split<M: LeafModel>(
        &self,
        data: &Dataset,
        model: &M,
        sigma_sq: f64,
        tree_num: usize,
        node: usize,
        feature: usize,
        rule: &SplitRule,
    ) -> (f64, f64, usize, usize) {
        let mut parent_stat = model.zero_stat();
        let mut left_stat = model.zero_stat();
        let mut right_stat = model.zero_stat();
        for &obs in self.partitions[tree_num].node_observations(node) {
            parent_stat.increment(data, obs);
            if rule.goes_left(data.covariate(obs, feature)) {
                left_stat.increment(data, obs);
            } else {
                right_stat.increment(data, obs);
            }
        }
        let split_ml = model.log_ml(&left_stat, sigma_sq) + model.log_ml(&right_stat, sigma_sq);
        let no_split_ml = model.log_ml(&parent_stat, sigma_sq);
        (split_ml, no_split_ml, left_stat.n(), right_stat.n())
    }

    /// Statistics of an existing split, read off the children's ranges.
    fn evaluate_children<M: LeafModel>(
        &self,
        data: &Dataset,
        model: &M,
        sigma_sq: f64,
        tree_num: usize,
        left: usize,
        right: usize,
    ) -> (f64, f64) {
        let partition = &self.partitions[tree_num];
        let mut parent_stat = model.zero_stat();
        let mut left_stat = model.zero_stat();
        let mut right_stat = model.zero_stat();
        for &obs in partition.node_observations(left) {
            parent_stat.increment(data, obs);
            left_stat.increment(data, obs);
        }
        for &obs in partition.node_observations(right) {
            parent_stat.increment(data, obs);
            right_stat.increment(data, obs);
        }
        let split_ml = model.log_ml(&left_stat, sigma_sq) + model.log_ml(&right_stat, sigma_sq);
        let no_split_ml = model.log_ml(&parent_stat, sigma_sq);
        (split_ml, no_split_ml)
    }

    /// Commits an accepted grow to the tree, the tracker, and the leaf map.
    fn add_split(
        &mut self,
        tree: &mut Tree,
        data: &Dataset,
        tree_num: usize,
        node: usize,
        feature: usize,
        rule: SplitRule,
    ) -> Result<()> {
        let (left, right) =
            tree.expand_node(node, feature, rule.clone())
                .map_err(|e| Error::Invariant {
                    tree: tree_num,
                    node,
                    message: e.to_string(),
                })?;
        let partition = &mut self.partitions[tree_num];
        partition.apply_split(data, node, left, right, feature, &rule);
        partition.update_observation_mapping(left, tree_num, &mut self.leaf_map);
        partition.update_observation_mapping(right, tree_num, &mut self.leaf_map);
        Ok(())
    }

    /// Commits an accepted prune to the tree, the tracker, and the leaf
    /// map.
    fn remove_split(&mut self, tree: &mut Tree, tree_num: usize, node: usize) -> Result<()> {
        tree.collapse_node(node).map_err(|e| Error::Invariant {
            tree: tree_num,
            node,
            message: e.to_string(),
        })?;
        let partition = &mut self.partitions[tree_num];
        partition.prune_to_leaf(node);
        partition.update_observation_mapping(node, tree_num, &mut self.leaf_map);
        Ok(())
    }
}
