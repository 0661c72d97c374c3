use ndarray::{array, Array2};

use super::{brute_force, random_points};
use crate::{Dataset, Error, IndexStrategy, Metric, NeighborIndex, NeighborIndexBuilder};

#[test]
fn test_lists_have_k_entries_without_self() {
    let data = Dataset::new(random_points(200, 4, 11)).unwrap();
    let index = NeighborIndex::build(&data, 7, Metric::Euclidean, IndexStrategy::Exact).unwrap();

    assert_eq!(7, index.k());
    assert_eq!(200, index.len());
    for i in 0..index.len() {
        assert_eq!(7, index.neighbours(i).len());
        assert!(!index.neighbours(i).contains(&i));
        for pair in index.distances(i).windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }
}

#[test]
fn test_cover_tree_matches_exact() {
    let data = Dataset::new(random_points(400, 4, 12)).unwrap();
    let exact = NeighborIndex::build(&data, 8, Metric::Euclidean, IndexStrategy::Exact).unwrap();
    let tree = NeighborIndex::build(&data, 8, Metric::Euclidean, IndexStrategy::CoverTree).unwrap();

    for i in 0..data.len() {
        assert_eq!(exact.neighbours(i), tree.neighbours(i));
        assert_eq!(brute_force(data.view(), i, 8, Metric::Euclidean), tree.neighbours(i));
    }
}

#[test]
fn test_cover_tree_matches_exact_angular() {
    let data = Dataset::new(random_points(800, 10, 19) * 2. - 1.).unwrap();
    let exact = NeighborIndex::build(&data, 15, Metric::Angular, IndexStrategy::Exact).unwrap();
    let tree = NeighborIndex::build(&data, 15, Metric::Angular, IndexStrategy::CoverTree).unwrap();

    for i in 0..data.len() {
        assert_eq!(brute_force(data.view(), i, 15, Metric::Angular), tree.neighbours(i));
        assert_eq!(exact.neighbours(i), tree.neighbours(i));
        assert_eq!(exact.distances(i), tree.distances(i));
    }
}

#[test]
fn test_auto_strategy_and_tree_base() {
    let data = Dataset::new(random_points(300, 3, 13)).unwrap();
    let auto = NeighborIndexBuilder::new()
        .k(4)
        .strategy(IndexStrategy::Auto { exact_below: 100 })
        .tree_base(2.)
        .build(&data)
        .unwrap();

    for i in (0..data.len()).step_by(7) {
        assert_eq!(brute_force(data.view(), i, 4, Metric::Euclidean), auto.neighbours(i));
    }
}

#[test]
fn test_k_at_least_n_returns_all_others() {
    let data = Dataset::new(random_points(5, 2, 14)).unwrap();

    for strategy in [IndexStrategy::Exact, IndexStrategy::CoverTree] {
        let index = NeighborIndex::build(&data, 10, Metric::Euclidean, strategy).unwrap();
        assert_eq!(4, index.k());
        for i in 0..5 {
            let mut list = index.neighbours(i).to_vec();
            list.sort_unstable();
            let expected: Vec<usize> = (0..5).filter(|&j| j != i).collect();
            assert_eq!(expected, list);
        }
    }
}

#[test]
fn test_identical_points() {
    let data = Dataset::new(Array2::from_elem((10, 3), 1.5)).unwrap();

    for strategy in [IndexStrategy::Exact, IndexStrategy::CoverTree] {
        let index = NeighborIndex::build(&data, 3, Metric::Euclidean, strategy).unwrap();
        for i in 0..10 {
            assert_eq!(3, index.neighbours(i).len());
            assert!(!index.neighbours(i).contains(&i));
            assert!(index.distances(i).iter().all(|&d| d == 0.));
        }
    }
}

#[test]
fn test_zero_k_is_rejected() {
    let data = Dataset::new(random_points(10, 2, 15)).unwrap();
    let err = NeighborIndex::build(&data, 0, Metric::Euclidean, IndexStrategy::Exact).unwrap_err();
    assert!(matches!(err, Error::InvalidConfiguration(_)));
}

#[test]
fn test_out_of_sample_query() {
    let data = Dataset::new(array![[0., 0.], [1., 0.], [5., 5.], [6., 5.]]).unwrap();
    let index = NeighborIndex::build(&data, 1, Metric::Euclidean, IndexStrategy::CoverTree).unwrap();

    let found = index.query(array![5.4, 5.1].view(), 2).unwrap();
    assert_eq!(vec![2, 3], found.iter().map(|n| n.index()).collect::<Vec<_>>());

    let err = index.query(array![1., 2., 3.].view(), 1).unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidDimension {
            expected: 2,
            found: 3,
            ..
        }
    ));

    let err = index.query(array![f64::NAN, 0.].view(), 1).unwrap_err();
    assert!(matches!(err, Error::NonFiniteInput { row: 0, column: 0 }));
}

#[test]
fn test_contains() {
    let data = Dataset::new(array![[0.], [1.], [10.], [11.]]).unwrap();
    let index = NeighborIndex::build(&data, 1, Metric::Euclidean, IndexStrategy::Exact).unwrap();

    assert!(index.contains(0, 1));
    assert!(index.contains(3, 2));
    assert!(!index.contains(0, 2));
}
