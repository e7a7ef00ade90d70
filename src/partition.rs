//! Partition tracking for the grow/prune sampler.
//!
//! [`UnsortedPartition`] maintains, for one tree, a permutation of the
//! observation indices together with a contiguous `(begin, length)` range
//! per live node, so that the observations inside any node can be visited
//! without touching the rest of the dataset. [`SampleNodeMap`] maps every
//! observation to its current leaf for every tree in the ensemble.

use crate::data::Dataset;
use crate::split::SplitRule;
use crate::tree::{Tree, ROOT_ID};

/// Access to the observations currently contained in a node. Implemented
/// by both partition trackers so the leaf sampler can run over either.
pub trait NodeObservations {
    /// Observation indices inside `node`, in tracker-specific order.
    fn node_observations(&self, node: usize) -> &[usize];
}

/// Per-tree observation-to-leaf mapping.
#[derive(Debug, Clone)]
pub struct SampleNodeMap {
    node_ids: Vec<Vec<usize>>,
}

impl SampleNodeMap {
    /// Creates a map for `num_trees` trees over `num_observations` rows,
    /// with every observation assigned to the root.
    pub fn new(num_trees: usize, num_observations: usize) -> Self {
        Self {
            node_ids: vec![vec![ROOT_ID; num_observations]; num_trees],
        }
    }

    /// Current leaf of `observation` in tree `tree_id`.
    #[inline(always)]
    pub fn node_id(&self, tree_id: usize, observation: usize) -> usize {
        self.node_ids[tree_id][observation]
    }

    /// Reassigns one observation.
    #[inline(always)]
    pub fn set_node_id(&mut self, tree_id: usize, observation: usize, node: usize) {
        self.node_ids[tree_id][observation] = node;
    }

    /// Sends every observation of one tree back to the root.
    pub fn assign_all_to_root(&mut self, tree_id: usize) {
        self.node_ids[tree_id].fill(ROOT_ID);
    }
}

/// Contiguous-range partition of the observation indices for one tree, in
/// no feature-specific order.
///
/// Invariants: the index array is a permutation of `0..n`; for any internal
/// node the children's ranges partition the parent's range and are
/// contiguous within it.
#[derive(Debug, Clone)]
pub struct UnsortedPartition {
    indices: Vec<usize>,
    node_begin: Vec<usize>,
    node_length: Vec<usize>,
    parent: Vec<Option<usize>>,
    left: Vec<Option<usize>>,
    right: Vec<Option<usize>>,
    deleted: Vec<bool>,
    free: Vec<usize>,
}

impl UnsortedPartition {
    /// Creates a partition with all `n` observations in the root.
    pub fn new(n: usize) -> Self {
        Self {
            indices: (0..n).collect(),
            node_begin: vec![0],
            node_length: vec![n],
            parent: vec![None],
            left: vec![None],
            right: vec![None],
            deleted: vec![false],
            free: Vec::new(),
        }
    }

    /// The full index permutation.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// First position of `node`'s observations within the permutation.
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

    /// Whether `node` is tracked and live.
    pub fn is_valid_node(&self, node: usize) -> bool {
        node < self.node_begin.len() && !self.deleted[node]
    }

    /// Whether `node` currently has no children in the partition.
    pub fn is_leaf(&self, node: usize) -> bool {
        self.left[node].is_none()
    }

    fn ensure_slot(&mut self, node: usize) {
        if node >= self.node_begin.len() {
            let len = node + 1;
            self.node_begin.resize(len, 0);
            self.node_length.resize(len, 0);
            self.parent.resize(len, None);
            self.left.resize(len, None);
            self.right.resize(len, None);
            self.deleted.resize(len, true);
        }
        if let Some(pos) = self.free.iter().position(|&d| d == node) {
            self.free.swap_remove(pos);
        }
    }

    /// Applies a committed split: reorders `node`'s range in place so that
    /// observations satisfying the rule occupy the prefix, then records the
    /// two child ranges under the ids allocated by the tree. Relative order
    /// inside each side is not part of the contract.
    pub fn apply_split(
        &mut self,
        data: &Dataset,
        node: usize,
        left_id: usize,
        right_id: usize,
        feature: usize,
        rule: &SplitRule,
    ) {
        let begin = self.node_begin[node];
        let end = self.node_end(node);

        let mut left_block: Vec<usize> = Vec::with_capacity(end - begin);
        let mut right_block: Vec<usize> = Vec::with_capacity(end - begin);
        for &obs in &self.indices[begin..end] {
            if rule.goes_left(data.covariate(obs, feature)) {
                left_block.push(obs);
            } else {
                right_block.push(obs);
            }
        }
        let num_left = left_block.len();
        self.indices[begin..begin + num_left].copy_from_slice(&left_block);
        self.indices[begin + num_left..end].copy_from_slice(&right_block);

        self.ensure_slot(left_id);
        self.ensure_slot(right_id);
        self.node_begin[left_id] = begin;
        self.node_length[left_id] = num_left;
        self.node_begin[right_id] = begin + num_left;
        self.node_length[right_id] = end - begin - num_left;
        self.parent[left_id] = Some(node);
        self.parent[right_id] = Some(node);
        self.left[left_id] = None;
        self.right[left_id] = None;
        self.left[right_id] = None;
        self.right[right_id] = None;
        self.deleted[left_id] = false;
        self.deleted[right_id] = false;
        self.left[node] = Some(left_id);
        self.right[node] = Some(right_id);
    }

    /// Converts a node whose children are both leaves back into a leaf.
    /// The children's ranges are already contiguous within the parent, so
    /// no data movement is required; their slots go to the free list.
    pub fn prune_to_leaf(&mut self, node: usize) {
        let l = self.left[node].expect("pruned node has a left child");
        let r = self.right[node].expect("pruned node has a right child");
        debug_assert!(self.is_leaf(l) && self.is_leaf(r));
        debug_assert_eq!(self.node_end(l), self.node_begin[r]);

        self.deleted[l] = true;
        self.deleted[r] = true;
        self.free.push(r);
        self.free.push(l);
        self.left[node] = None;
        self.right[node] = None;
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
            map.set_node_id(tree_id, self.indices[pos], node);
        }
    }

    /// Refreshes the sample-node map for every live leaf of `tree`.
    pub fn refresh_leaf_map(&self, tree: &Tree, tree_id: usize, map: &mut SampleNodeMap) {
        for leaf in tree.leaves() {
            self.update_observation_mapping(leaf, tree_id, map);
        }
    }
}

impl NodeObservations for UnsortedPartition {
    fn node_observations(&self, node: usize) -> &[usize] {
        &self.indices[self.node_begin(node)..self.node_end(node)]
    }
}
