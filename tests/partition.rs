use ndarray::{Array1, Array2};

use sumtrees::data::{Dataset, FeatureType};
use sumtrees::partition::{NodeObservations, SampleNodeMap, UnsortedPartition};
use sumtrees::split::SplitRule;
use sumtrees::tree::{Tree, ROOT_ID};

fn one_column_dataset(values: Vec<f64>) -> Dataset {
    let n = values.len();
    let x = Array2::from_shape_vec((n, 1), values).unwrap();
    let y = Array1::zeros(n);
    Dataset::new(x, y, vec![FeatureType::Numeric]).unwrap()
}

fn assert_permutation(partition: &UnsortedPartition, n: usize) {
    let mut seen = partition.indices().to_vec();
    seen.sort_unstable();
    assert_eq!(seen, (0..n).collect::<Vec<_>>());
}

#[test]
fn test_split_partitions_the_range() {
    let data = one_column_dataset(vec![5.0, 1.0, 4.0, 2.0, 3.0]);
    let mut tree = Tree::new(0.0, 1);
    let mut partition = UnsortedPartition::new(5);

    let rule = SplitRule::Numeric(2.5);
    let (left, right) = tree.expand_node(ROOT_ID, 0, rule.clone()).unwrap();
    partition.apply_split(&data, ROOT_ID, left, right, 0, &rule);

    assert_permutation(&partition, 5);
    assert_eq!(partition.node_size(left), 2);
    assert_eq!(partition.node_size(right), 3);
    assert_eq!(partition.node_begin(left), 0);
    assert_eq!(partition.node_begin(right), 2);
    assert_eq!(partition.node_end(right), 5);

    // Observations 1 and 3 hold the two values below the threshold.
    let mut left_obs = partition.node_observations(left).to_vec();
    left_obs.sort_unstable();
    assert_eq!(left_obs, vec![1, 3]);
    for &obs in partition.node_observations(right) {
        assert!(data.covariate(obs, 0) > 2.5);
    }
}

#[test]
fn test_nested_splits_keep_ranges_disjoint_and_covering() {
    let data = one_column_dataset((0..12).map(|i| i as f64).collect());
    let mut tree = Tree::new(0.0, 1);
    let mut partition = UnsortedPartition::new(12);

    let rule = SplitRule::Numeric(5.5);
    let (left, right) = tree.expand_node(ROOT_ID, 0, rule.clone()).unwrap();
    partition.apply_split(&data, ROOT_ID, left, right, 0, &rule);

    let rule2 = SplitRule::Numeric(2.5);
    let (ll, lr) = tree.expand_node(left, 0, rule2.clone()).unwrap();
    partition.apply_split(&data, left, ll, lr, 0, &rule2);

    assert_permutation(&partition, 12);

    // The live leaves tile [0, 12) without overlap.
    let mut covered = vec![false; 12];
    for leaf in tree.leaves() {
        for pos in partition.node_begin(leaf)..partition.node_end(leaf) {
            assert!(!covered[pos], "leaf ranges overlap at position {pos}");
            covered[pos] = true;
        }
    }
    assert!(covered.iter().all(|&c| c));

    // Children tile their parent.
    assert_eq!(partition.node_begin(ll), partition.node_begin(left));
    assert_eq!(partition.node_end(lr), partition.node_end(left));
    assert_eq!(partition.node_end(ll), partition.node_begin(lr));
}

#[test]
fn test_leaf_map_agrees_with_ranges() {
    let data = one_column_dataset(vec![3.0, 0.0, 2.0, 1.0, 5.0, 4.0]);
    let mut tree = Tree::new(0.0, 1);
    let mut partition = UnsortedPartition::new(6);
    let mut map = SampleNodeMap::new(1, 6);

    let rule = SplitRule::Numeric(2.5);
    let (left, right) = tree.expand_node(ROOT_ID, 0, rule.clone()).unwrap();
    partition.apply_split(&data, ROOT_ID, left, right, 0, &rule);
    partition.refresh_leaf_map(&tree, 0, &mut map);

    for obs in 0..6 {
        let leaf = map.node_id(0, obs);
        assert!(partition
            .node_observations(leaf)
            .contains(&obs));
    }
    assert_eq!(map.node_id(0, 1), left);
    assert_eq!(map.node_id(0, 4), right);
}

#[test]
fn test_grow_then_prune_restores_the_tracker() {
    let data = one_column_dataset(vec![2.0, 7.0, 1.0, 9.0, 4.0]);
    let mut tree = Tree::new(0.0, 1);
    let mut partition = UnsortedPartition::new(5);
    let indices_before = partition.indices().to_vec();

    let rule = SplitRule::Numeric(4.5);
    let (left, right) = tree.expand_node(ROOT_ID, 0, rule.clone()).unwrap();
    partition.apply_split(&data, ROOT_ID, left, right, 0, &rule);

    tree.collapse_node(ROOT_ID).unwrap();
    partition.prune_to_leaf(ROOT_ID);

    // Structure back to a root-only partition covering everything.
    assert!(partition.is_leaf(ROOT_ID));
    assert!(!partition.is_valid_node(left));
    assert!(!partition.is_valid_node(right));
    assert_eq!(partition.node_begin(ROOT_ID), 0);
    assert_eq!(partition.node_end(ROOT_ID), 5);
    assert_permutation(&partition, 5);

    // Leaf membership is identical even though the permutation may not be.
    let mut before = indices_before;
    let mut after = partition.indices().to_vec();
    before.sort_unstable();
    after.sort_unstable();
    assert_eq!(before, after);
    assert!(tree.is_leaf(ROOT_ID));
    assert_eq!(tree.num_valid_nodes(), 1);
}

#[test]
fn test_pruned_ids_are_reused_consistently() {
    let data = one_column_dataset(vec![0.0, 1.0, 2.0, 3.0]);
    let mut tree = Tree::new(0.0, 1);
    let mut partition = UnsortedPartition::new(4);

    let rule = SplitRule::Numeric(1.5);
    let (left, right) = tree.expand_node(ROOT_ID, 0, rule.clone()).unwrap();
    partition.apply_split(&data, ROOT_ID, left, right, 0, &rule);
    tree.collapse_node(ROOT_ID).unwrap();
    partition.prune_to_leaf(ROOT_ID);

    let rule2 = SplitRule::Numeric(2.5);
    let (left2, right2) = tree.expand_node(ROOT_ID, 0, rule2.clone()).unwrap();
    partition.apply_split(&data, ROOT_ID, left2, right2, 0, &rule2);

    assert_eq!((left2, right2), (left, right));
    assert_eq!(partition.node_size(left2), 3);
    assert_eq!(partition.node_size(right2), 1);
    assert!(partition.is_valid_node(left2) && partition.is_valid_node(right2));
}
