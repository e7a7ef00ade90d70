//! A binary decision tree is the core data structure for Bayesian Additive
//! Regression Trees. The tree is implemented using parallel vectors indexed
//! by node id, with explicit child and parent links so that nodes can be
//! collapsed back into leaves and their slots reused.

use core::fmt;

use ndarray::ArrayView1;
use serde::Serialize;

use crate::split::SplitRule;

/// Id of the root node.
pub const ROOT_ID: usize = 0;

/// Represents errors related to binary decision tree operations.
#[derive(Debug)]
pub enum TreeError {
    /// When attempting to split a leaf node, if the node is not a leaf.
    NonLeafSplit,
    /// When the node id does not refer to a live node.
    InvalidNodeIndex,
    /// When collapsing a node whose children are not both leaves.
    NotALeafParent,
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TreeError::NonLeafSplit => write!(f, "cannot split a non-leaf node"),
            TreeError::InvalidNodeIndex => write!(f, "node index does not exist"),
            TreeError::NotALeafParent => write!(f, "cannot collapse a node whose children are not leaves"),
        }
    }
}

/// One node of a serialized tree, in pre-order position.
#[derive(Debug, Clone, Serialize)]
pub struct PreorderNode {
    /// Whether this entry is a leaf.
    pub leaf: bool,
    /// Split feature, for internal entries.
    pub feature: Option<usize>,
    /// Numeric threshold, for internal numeric splits.
    pub threshold: Option<f64>,
    /// Category subset, for internal categorical splits.
    pub categories: Option<Vec<u32>>,
    /// Leaf value (length `leaf_dim`), for leaf entries.
    pub value: Option<Vec<f64>>,
}

/// A `Tree` is a sparse binary tree addressed by integer node ids.
///
/// The `i`-th element of each parallel vector holds information about node
/// `i`; node 0 is the root. `feature` and `rule` only apply to internal
/// nodes, `values` only to leaves; the other entries are arbitrary. Leaf
/// values are stored in one flat buffer with a fixed stride so that scalar
/// and vector leaves share a representation.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    feature: Vec<usize>,
    rule: Vec<SplitRule>,
    left: Vec<Option<usize>>,
    right: Vec<Option<usize>>,
    parent: Vec<Option<usize>>,
    deleted: Vec<bool>,
    free: Vec<usize>,
    values: Vec<f64>,
    leaf_dim: usize,
}

impl Tree {
    /// Creates a root-only tree whose leaf carries `leaf_dim` zeros, then
    /// sets entry 0 of the root value to `init_value`.
    pub fn new(init_value: f64, leaf_dim: usize) -> Self {
        let mut values = vec![0.0; leaf_dim];
        values[0] = init_value;
        Self {
            feature: vec![0],
            rule: vec![SplitRule::none()],
            left: vec![None],
            right: vec![None],
            parent: vec![None],
            deleted: vec![false],
            free: Vec::new(),
            values,
            leaf_dim,
        }
    }

    /// Resets the tree to a root-only leaf with the given initial value.
    pub fn reset(&mut self, init_value: f64) {
        self.feature.clear();
        self.feature.push(0);
        self.rule.clear();
        self.rule.push(SplitRule::none());
        self.left.clear();
        self.left.push(None);
        self.right.clear();
        self.right.push(None);
        self.parent.clear();
        self.parent.push(None);
        self.deleted.clear();
        self.deleted.push(false);
        self.free.clear();
        self.values.clear();
        self.values.resize(self.leaf_dim, 0.0);
        self.values[0] = init_value;
    }

    /// Length of each leaf value vector (1 for scalar leaves).
    #[inline(always)]
    pub fn leaf_dim(&self) -> usize {
        self.leaf_dim
    }

    /// Whether `index` refers to a live node.
    pub fn is_valid(&self, index: usize) -> bool {
        index < self.feature.len() && !self.deleted[index]
    }

    /// Whether the node is a leaf. An index is a leaf node if it has no
    /// children.
    #[inline(always)]
    pub fn is_leaf(&self, index: usize) -> bool {
        self.left[index].is_none() && self.right[index].is_none()
    }

    /// Left child of the node, if it is internal.
    #[inline(always)]
    pub fn left_child(&self, index: usize) -> Option<usize> {
        self.left[index]
    }

    /// Right child of the node, if it is internal.
    #[inline(always)]
    pub fn right_child(&self, index: usize) -> Option<usize> {
        self.right[index]
    }

    /// Parent of the node (`None` for the root).
    #[inline(always)]
    pub fn parent(&self, index: usize) -> Option<usize> {
        self.parent[index]
    }

    /// Split feature of an internal node.
    #[inline(always)]
    pub fn split_feature(&self, index: usize) -> usize {
        self.feature[index]
    }

    /// Split rule of an internal node.
    #[inline(always)]
    pub fn split_rule(&self, index: usize) -> &SplitRule {
        &self.rule[index]
    }

    /// Computes the depth of the node by walking parent links.
    pub fn node_depth(&self, index: usize) -> usize {
        let mut depth = 0;
        let mut current = index;
        while let Some(up) = self.parent[current] {
            depth += 1;
            current = up;
        }
        depth
    }

    /// Number of live nodes.
    pub fn num_valid_nodes(&self) -> usize {
        self.feature.len() - self.free.len()
    }

    /// All live leaf ids, in ascending id order.
    pub fn leaves(&self) -> Vec<usize> {
        (0..self.feature.len())
            .filter(|&i| !self.deleted[i] && self.is_leaf(i))
            .collect()
    }

    /// Number of live leaves.
    pub fn num_leaves(&self) -> usize {
        self.leaves().len()
    }

    /// All internal nodes whose children are both leaves. These are the
    /// only nodes eligible for pruning.
    pub fn leaf_parents(&self) -> Vec<usize> {
        (0..self.feature.len())
            .filter(|&i| {
                if self.deleted[i] || self.is_leaf(i) {
                    return false;
                }
                let l = self.left[i].expect("internal node has a left child");
                let r = self.right[i].expect("internal node has a right child");
                self.is_leaf(l) && self.is_leaf(r)
            })
            .collect()
    }

    /// Value vector of a leaf node.
    #[inline(always)]
    pub fn leaf_value(&self, index: usize) -> &[f64] {
        let start = index * self.leaf_dim;
        &self.values[start..start + self.leaf_dim]
    }

    /// First entry of a leaf value (the whole value for scalar leaves).
    #[inline(always)]
    pub fn leaf_scalar(&self, index: usize) -> f64 {
        self.values[index * self.leaf_dim]
    }

    /// Overwrites the value vector of a leaf node.
    pub fn set_leaf_value(&mut self, index: usize, value: &[f64]) {
        debug_assert_eq!(value.len(), self.leaf_dim);
        let start = index * self.leaf_dim;
        self.values[start..start + self.leaf_dim].copy_from_slice(value);
    }

    /// Sum of squared leaf entries over all live leaves.
    pub fn sum_leaf_squared(&self) -> f64 {
        self.leaves()
            .iter()
            .flat_map(|&leaf| self.leaf_value(leaf).iter())
            .map(|v| v * v)
            .sum()
    }

    fn allocate_node(&mut self) -> usize {
        if let Some(id) = self.free.pop() {
            self.feature[id] = 0;
            self.rule[id] = SplitRule::none();
            self.left[id] = None;
            self.right[id] = None;
            self.parent[id] = None;
            self.deleted[id] = false;
            let start = id * self.leaf_dim;
            self.values[start..start + self.leaf_dim].fill(0.0);
            id
        } else {
            self.feature.push(0);
            self.rule.push(SplitRule::none());
            self.left.push(None);
            self.right.push(None);
            self.parent.push(None);
            self.deleted.push(false);
            self.values.extend(std::iter::repeat(0.0).take(self.leaf_dim));
            self.feature.len() - 1
        }
    }

    /// Splits a leaf into an internal node with the given rule. The two new
    /// children are leaves with zero values (leaf parameters are drawn after
    /// the structure settles). Returns `(left_id, right_id)`.
    pub fn expand_node(
        &mut self,
        index: usize,
        feature: usize,
        rule: SplitRule,
    ) -> Result<(usize, usize), TreeError> {
        if !self.is_valid(index) {
            return Err(TreeError::InvalidNodeIndex);
        }
        if !self.is_leaf(index) {
            return Err(TreeError::NonLeafSplit);
        }

        self.feature[index] = feature;
        self.rule[index] = rule;

        let left_id = self.allocate_node();
        let right_id = self.allocate_node();
        self.parent[left_id] = Some(index);
        self.parent[right_id] = Some(index);
        self.left[index] = Some(left_id);
        self.right[index] = Some(right_id);

        Ok((left_id, right_id))
    }

    /// Collapses an internal node whose children are both leaves back into
    /// a leaf with a zero value. The child slots return to the free list.
    pub fn collapse_node(&mut self, index: usize) -> Result<(), TreeError> {
        if !self.is_valid(index) {
            return Err(TreeError::InvalidNodeIndex);
        }
        let (l, r) = match (self.left[index], self.right[index]) {
            (Some(l), Some(r)) => (l, r),
            _ => return Err(TreeError::NotALeafParent),
        };
        if !self.is_leaf(l) || !self.is_leaf(r) {
            return Err(TreeError::NotALeafParent);
        }

        self.deleted[l] = true;
        self.deleted[r] = true;
        // Pushed right-then-left so the next expansion reuses the same ids
        // in left, right order.
        self.free.push(r);
        self.free.push(l);

        self.left[index] = None;
        self.right[index] = None;
        self.feature[index] = 0;
        self.rule[index] = SplitRule::none();
        let start = index * self.leaf_dim;
        self.values[start..start + self.leaf_dim].fill(0.0);
        Ok(())
    }

    /// Routes one covariate row from the root to its leaf and returns the
    /// leaf id.
    pub fn leaf_for_row(&self, row: ArrayView1<f64>) -> usize {
        let mut node = ROOT_ID;
        while !self.is_leaf(node) {
            let value = row[self.feature[node]];
            node = if self.rule[node].goes_left(value) {
                self.left[node].expect("internal node has a left child")
            } else {
                self.right[node].expect("internal node has a right child")
            };
        }
        node
    }

    /// Serializes the tree as a pre-order node list.
    pub fn preorder(&self) -> Vec<PreorderNode> {
        let mut out = Vec::with_capacity(self.num_valid_nodes());
        let mut stack = vec![ROOT_ID];
        while let Some(node) = stack.pop() {
            if self.is_leaf(node) {
                out.push(PreorderNode {
                    leaf: true,
                    feature: None,
                    threshold: None,
                    categories: None,
                    value: Some(self.leaf_value(node).to_vec()),
                });
            } else {
                let (threshold, categories) = match &self.rule[node] {
                    SplitRule::Numeric(t) => (Some(*t), None),
                    SplitRule::Categories(set) => (None, Some(set.to_vec())),
                };
                out.push(PreorderNode {
                    leaf: false,
                    feature: Some(self.feature[node]),
                    threshold,
                    categories,
                    value: None,
                });
                stack.push(self.right[node].expect("internal node has a right child"));
                stack.push(self.left[node].expect("internal node has a left child"));
            }
        }
        out
    }
}

/// Ordered sequence of trees; the model prediction is the sum of per-tree
/// predictions.
#[derive(Debug, Clone)]
pub struct Ensemble {
    trees: Vec<Tree>,
}

impl Ensemble {
    /// Creates `num_trees` root-only trees, each initialized like
    /// [`Tree::new`].
    pub fn new(num_trees: usize, init_value: f64, leaf_dim: usize) -> Self {
        Self {
            trees: (0..num_trees).map(|_| Tree::new(init_value, leaf_dim)).collect(),
        }
    }

    /// Number of trees.
    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Borrow tree `j`.
    pub fn tree(&self, j: usize) -> &Tree {
        &self.trees[j]
    }

    /// Mutably borrow tree `j`.
    pub fn tree_mut(&mut self, j: usize) -> &mut Tree {
        &mut self.trees[j]
    }

    /// Replaces tree `j` with a copy of another tree.
    pub fn clone_tree_from(&mut self, j: usize, other: &Tree) {
        self.trees[j] = other.clone();
    }

    /// Resets tree `j` to a root-only leaf.
    pub fn reset_tree(&mut self, j: usize, init_value: f64) {
        self.trees[j].reset(init_value);
    }

    /// Total number of live leaves across all trees.
    pub fn num_leaves(&self) -> usize {
        self.trees.iter().map(|t| t.num_leaves()).sum()
    }

    /// Sum of squared leaf entries across all trees.
    pub fn sum_leaf_squared(&self) -> f64 {
        self.trees.iter().map(|t| t.sum_leaf_squared()).sum()
    }
}
