//! Candidate cutpoint enumeration for the grow-from-root sampler.
//!
//! For the observations currently in one node, the grid compresses each
//! feature into at most `cutpoint_grid_size` ordered bins over that
//! feature's sorted positions. Splitting "at" bin `c` routes bins `0..=c`
//! to the left child, so the candidate cutpoints are every bin except the
//! last. The grid is reset per node rather than reallocated.

use crate::data::{Dataset, FeatureType};
use crate::presort::SortedPartition;
use crate::split::CategorySet;

/// One bin of contiguous sorted positions within a node's range.
#[derive(Debug, Clone, Copy)]
pub struct Bin {
    /// Absolute first position in the feature's sorted ordering.
    pub begin: usize,
    /// Number of positions in the bin.
    pub length: usize,
    /// Representative split value: the largest feature value in the bin
    /// for numeric features, the category id for unordered-categorical
    /// features.
    pub value: f64,
}

/// Per-feature cutpoint bins for a single node.
#[derive(Debug)]
pub struct CutpointGrid {
    grid_size: usize,
    bins: Vec<Vec<Bin>>,
    categories: Vec<Vec<u32>>,
}

impl CutpointGrid {
    /// Creates an empty grid with the given maximum bin count per feature.
    pub fn new(grid_size: usize) -> Self {
        Self {
            grid_size,
            bins: Vec::new(),
            categories: Vec::new(),
        }
    }

    /// Recomputes the bins of every feature for `node`, reusing the
    /// existing allocations.
    pub fn compute(&mut self, data: &Dataset, partition: &SortedPartition, node: usize) {
        let p = data.num_features();
        self.bins.resize_with(p, Vec::new);
        self.categories.resize_with(p, Vec::new);
        for feature in 0..p {
            self.bins[feature].clear();
            self.categories[feature].clear();
            match data.feature_type(feature) {
                FeatureType::Numeric | FeatureType::OrderedCategorical => {
                    self.compute_numeric(data, partition, node, feature);
                }
                FeatureType::UnorderedCategorical => {
                    self.compute_categorical(data, partition, node, feature);
                }
            }
        }
    }

    /// Number of candidate cutpoints for `feature` (every bin except the
    /// last, capped at the grid size for category subsets).
    pub fn num_cutpoints(&self, feature: usize) -> usize {
        let bins = self.bins[feature].len();
        if bins < 2 {
            return 0;
        }
        if self.categories[feature].is_empty() {
            bins - 1
        } else {
            (bins - 1).min(self.grid_size)
        }
    }

    /// The `index`-th bin of `feature`.
    pub fn bin(&self, feature: usize, index: usize) -> Bin {
        self.bins[feature][index]
    }

    /// Numeric threshold for candidate `cut_index`: the upper edge of the
    /// last bin routed left.
    pub fn cutpoint_value(&self, feature: usize, cut_index: usize) -> f64 {
        self.bins[feature][cut_index].value
    }

    /// Category subset for candidate `cut_index`: the categories of bins
    /// `0..=cut_index` in within-node mean-residual order.
    pub fn category_subset(&self, feature: usize, cut_index: usize) -> CategorySet {
        self.categories[feature][..=cut_index].iter().copied().collect()
    }

    fn compute_numeric(
        &mut self,
        data: &Dataset,
        partition: &SortedPartition,
        node: usize,
        feature: usize,
    ) {
        let begin = partition.node_begin(node);
        let end = partition.node_end(node);
        let n = end - begin;
        if n == 0 {
            return;
        }

        // First pass: runs of equal value in sorted order.
        let mut runs: Vec<Bin> = Vec::new();
        let mut run_begin = begin;
        let mut run_value = data.covariate(partition.sort_index(begin, feature), feature);
        for pos in begin + 1..end {
            let value = data.covariate(partition.sort_index(pos, feature), feature);
            if value != run_value {
                runs.push(Bin {
                    begin: run_begin,
                    length: pos - run_begin,
                    value: run_value,
                });
                run_begin = pos;
                run_value = value;
            }
        }
        runs.push(Bin {
            begin: run_begin,
            length: end - run_begin,
            value: run_value,
        });

        if runs.len() <= self.grid_size {
            self.bins[feature] = runs;
            return;
        }

        // Too many distinct values: evenly-spaced quantile bins over the
        // sorted positions.
        let k = self.grid_size;
        for i in 0..k {
            let bin_begin = begin + i * n / k;
            let bin_end = begin + (i + 1) * n / k;
            if bin_end == bin_begin {
                continue;
            }
            self.bins[feature].push(Bin {
                begin: bin_begin,
                length: bin_end - bin_begin,
                value: data.covariate(partition.sort_index(bin_end - 1, feature), feature),
            });
        }
    }

    fn compute_categorical(
        &mut self,
        data: &Dataset,
        partition: &SortedPartition,
        node: usize,
        feature: usize,
    ) {
        let begin = partition.node_begin(node);
        let end = partition.node_end(node);
        if end == begin {
            return;
        }

        // Categories are contiguous runs in the value-sorted ordering.
        // Collect each run with its residual sum, then order the runs by
        // within-node mean residual so that prefix subsets form the
        // candidate category sets.
        struct CategoryRun {
            category: u32,
            begin: usize,
            length: usize,
            residual_sum: f64,
        }

        let mut runs: Vec<CategoryRun> = Vec::new();
        for pos in begin..end {
            let obs = partition.sort_index(pos, feature);
            let category = data.covariate(obs, feature) as u32;
            let continues_run = runs.last().map_or(false, |run| run.category == category);
            if continues_run {
                let run = runs.last_mut().expect("run exists");
                run.length += 1;
                run.residual_sum += data.residual(obs);
            } else {
                runs.push(CategoryRun {
                    category,
                    begin: pos,
                    length: 1,
                    residual_sum: data.residual(obs),
                });
            }
        }

        runs.sort_by(|a, b| {
            let mean_a = a.residual_sum / a.length as f64;
            let mean_b = b.residual_sum / b.length as f64;
            mean_a.partial_cmp(&mean_b).unwrap_or(std::cmp::Ordering::Equal)
        });

        for run in runs {
            self.bins[feature].push(Bin {
                begin: run.begin,
                length: run.length,
                value: run.category as f64,
            });
            self.categories[feature].push(run.category);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Dataset, FeatureType};
    use crate::presort::{PresortContainer, SortedPartition};
    use ndarray::{Array1, Array2};

    fn numeric_dataset(values: Vec<f64>) -> Dataset {
        let n = values.len();
        let x = Array2::from_shape_vec((n, 1), values).unwrap();
        let y = Array1::zeros(n);
        Dataset::new(x, y, vec![FeatureType::Numeric]).unwrap()
    }

    #[test]
    fn test_distinct_values_get_one_bin_each() {
        let data = numeric_dataset(vec![3.0, 1.0, 2.0, 2.0]);
        let presorts = PresortContainer::new(&data);
        let partition = SortedPartition::new(&presorts, &data);
        let mut grid = CutpointGrid::new(10);
        grid.compute(&data, &partition, 0);

        // Three distinct values, so two candidate cutpoints.
        assert_eq!(grid.num_cutpoints(0), 2);
        assert_eq!(grid.cutpoint_value(0, 0), 1.0);
        assert_eq!(grid.cutpoint_value(0, 1), 2.0);
        assert_eq!(grid.bin(0, 1).length, 2);
    }

    #[test]
    fn test_quantile_bins_cover_the_node() {
        let data = numeric_dataset((0..20).map(|i| i as f64).collect());
        let presorts = PresortContainer::new(&data);
        let partition = SortedPartition::new(&presorts, &data);
        let mut grid = CutpointGrid::new(4);
        grid.compute(&data, &partition, 0);

        assert_eq!(grid.num_cutpoints(0), 3);
        let total: usize = (0..4).map(|i| grid.bin(0, i).length).sum();
        assert_eq!(total, 20);
        // Bin edges land on the 5-quantiles of the sorted values.
        assert_eq!(grid.cutpoint_value(0, 0), 4.0);
        assert_eq!(grid.cutpoint_value(0, 1), 9.0);
        assert_eq!(grid.cutpoint_value(0, 2), 14.0);
    }

    #[test]
    fn test_constant_feature_has_no_cutpoints() {
        let data = numeric_dataset(vec![5.0; 6]);
        let presorts = PresortContainer::new(&data);
        let partition = SortedPartition::new(&presorts, &data);
        let mut grid = CutpointGrid::new(4);
        grid.compute(&data, &partition, 0);
        assert_eq!(grid.num_cutpoints(0), 0);
    }

    #[test]
    fn test_categorical_prefixes_follow_mean_residual_order() {
        let x = Array2::from_shape_vec((6, 1), vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0]).unwrap();
        let y = Array1::from_vec(vec![1.0, 1.0, -1.0, -1.0, 1.0, 1.0]);
        let data = Dataset::new(x, y, vec![FeatureType::UnorderedCategorical]).unwrap();
        let presorts = PresortContainer::new(&data);
        let partition = SortedPartition::new(&presorts, &data);
        let mut grid = CutpointGrid::new(4);
        grid.compute(&data, &partition, 0);

        assert_eq!(grid.num_cutpoints(0), 2);
        // Category 1 has the lowest mean residual, so it forms the first
        // prefix subset on its own.
        let subset = grid.category_subset(0, 0);
        assert_eq!(subset.as_slice(), &[1]);
        let subset = grid.category_subset(0, 1);
        assert_eq!(subset.len(), 2);
        assert!(subset.contains(&1));
    }
}
