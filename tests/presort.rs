use ndarray::{Array1, Array2};
use smallvec::smallvec;

use sumtrees::data::{Dataset, FeatureType};
use sumtrees::presort::{PresortContainer, SortedPartition};
use sumtrees::split::SplitRule;
use sumtrees::tree::{Tree, ROOT_ID};

fn assert_sorted_within(
    partition: &SortedPartition,
    data: &Dataset,
    node: usize,
    num_features: usize,
) {
    for feature in 0..num_features {
        let observations = partition.node_indices(node, feature);
        for pair in observations.windows(2) {
            assert!(
                data.covariate(pair[0], feature) <= data.covariate(pair[1], feature),
                "feature {feature} out of order in node {node}"
            );
        }
    }
}

#[test]
fn test_presort_orders_every_feature() {
    let x = Array2::from_shape_vec(
        (5, 2),
        vec![
            3.0, 10.0, //
            1.0, 40.0, //
            2.0, 20.0, //
            5.0, 30.0, //
            4.0, 0.0,
        ],
    )
    .unwrap();
    let y = Array1::zeros(5);
    let data = Dataset::new(x, y, vec![FeatureType::Numeric, FeatureType::Numeric]).unwrap();

    let presorts = PresortContainer::new(&data);
    let partition = SortedPartition::new(&presorts, &data);
    assert_sorted_within(&partition, &data, ROOT_ID, 2);
    assert_eq!(partition.node_indices(ROOT_ID, 0), &[1, 2, 0, 4, 3]);
    assert_eq!(partition.node_indices(ROOT_ID, 1), &[4, 0, 2, 3, 1]);
}

#[test]
fn test_split_preserves_per_feature_sortedness() {
    // Two features whose orderings disagree, so the sift actually moves
    // entries in the second ordering.
    let x = Array2::from_shape_vec(
        (8, 2),
        vec![
            0.0, 7.0, //
            1.0, 6.0, //
            2.0, 5.0, //
            3.0, 4.0, //
            4.0, 3.0, //
            5.0, 2.0, //
            6.0, 1.0, //
            7.0, 0.0,
        ],
    )
    .unwrap();
    let y = Array1::zeros(8);
    let data = Dataset::new(x, y, vec![FeatureType::Numeric, FeatureType::Numeric]).unwrap();

    let presorts = PresortContainer::new(&data);
    let mut partition = SortedPartition::new(&presorts, &data);
    let mut tree = Tree::new(0.0, 1);

    let rule = SplitRule::Numeric(2.5);
    let (left, right) = tree.expand_node(ROOT_ID, 0, rule.clone()).unwrap();
    let left_n = partition.apply_split(&data, ROOT_ID, left, right, 0, &rule);
    assert_eq!(left_n, 3);
    assert_eq!(partition.node_size(left), 3);
    assert_eq!(partition.node_size(right), 5);
    assert_sorted_within(&partition, &data, left, 2);
    assert_sorted_within(&partition, &data, right, 2);

    // Split the right child on the second feature and check again.
    let rule2 = SplitRule::Numeric(2.5);
    let (rl, rr) = tree.expand_node(right, 1, rule2.clone()).unwrap();
    partition.apply_split(&data, right, rl, rr, 1, &rule2);
    assert_sorted_within(&partition, &data, rl, 2);
    assert_sorted_within(&partition, &data, rr, 2);

    // Shared ranges: children tile the parent under every feature.
    assert_eq!(partition.node_begin(rl), partition.node_begin(right));
    assert_eq!(partition.node_end(rr), partition.node_end(right));
}

#[test]
fn test_categorical_split_sifts_all_features() {
    let x = Array2::from_shape_vec(
        (6, 2),
        vec![
            0.0, 5.0, //
            1.0, 4.0, //
            2.0, 3.0, //
            0.0, 2.0, //
            1.0, 1.0, //
            2.0, 0.0,
        ],
    )
    .unwrap();
    let y = Array1::zeros(6);
    let data = Dataset::new(
        x,
        y,
        vec![FeatureType::UnorderedCategorical, FeatureType::Numeric],
    )
    .unwrap();

    let presorts = PresortContainer::new(&data);
    let mut partition = SortedPartition::new(&presorts, &data);
    let mut tree = Tree::new(0.0, 1);

    let rule = SplitRule::Categories(smallvec![0, 2]);
    let (left, right) = tree.expand_node(ROOT_ID, 0, rule.clone()).unwrap();
    let left_n = partition.apply_split(&data, ROOT_ID, left, right, 0, &rule);
    assert_eq!(left_n, 4);
    assert_sorted_within(&partition, &data, left, 2);
    assert_sorted_within(&partition, &data, right, 2);
    for &obs in partition.node_indices(right, 0) {
        assert_eq!(data.covariate(obs, 0), 1.0);
    }
}
