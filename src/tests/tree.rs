use ndarray::{array, Array1, Array2};

use super::{brute_force, random_points};
use crate::{CoverTree, CoverTreeBuilder, Metric};

#[test]
fn test_search_matches_brute_force() {
    let data = random_points(300, 5, 1);
    let queries = random_points(20, 5, 2);
    let ct = CoverTreeBuilder::new().metric(Metric::Euclidean).build(data.view());

    assert_eq!(300, ct.size());
    assert!(ct.verify());

    for q in queries.outer_iter() {
        let result = ct.search(q, 10);
        let found: Vec<usize> = result.neighbours().iter().map(|n| n.index()).collect();

        let mut expected: Vec<(f64, usize)> = data
            .outer_iter()
            .enumerate()
            .map(|(i, row)| (Metric::Euclidean.distance(q, row), i))
            .collect();
        expected.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then(a.1.cmp(&b.1)));
        let expected: Vec<usize> = expected.into_iter().take(10).map(|(_, i)| i).collect();

        assert_eq!(expected, found);
    }
}

#[test]
fn test_search_manhattan() {
    let data = random_points(200, 4, 3);
    let ct = CoverTreeBuilder::new()
        .metric(Metric::Manhattan)
        .depth(10)
        .build(data.view());
    assert!(ct.verify());

    for idx in [0usize, 17, 199] {
        let result = ct.search(data.row(idx), 6);
        let found: Vec<usize> = result
            .neighbours()
            .iter()
            .map(|n| n.index())
            .filter(|&i| i != idx)
            .take(5)
            .collect();
        assert_eq!(brute_force(data.view(), idx, 5, Metric::Manhattan), found);
    }
}

#[test]
fn test_neighbours_sorted() {
    let data = random_points(150, 3, 4);
    let ct = CoverTreeBuilder::new().build(data.view());
    let result = ct.search(data.row(5), 20);

    assert_eq!(20, result.neighbours().len());
    assert_eq!(5, result.neighbours()[0].index());
    assert_eq!(0., result.neighbours()[0].dist());
    for pair in result.neighbours().iter().collect::<Vec<_>>().windows(2) {
        assert!(pair[0].dist() <= pair[1].dist());
    }
}

#[test]
fn test_sequential_insert() {
    let data = random_points(100, 6, 5);
    let mut ct = CoverTree::new(1.37, Metric::Euclidean);

    for (i, row) in data.outer_iter().enumerate() {
        assert_eq!(i, ct.insert(row.to_owned()));
    }

    assert_eq!(100, ct.size());
    assert!(ct.verify());

    let far = Array1::from_elem(6, 50.);
    let id = ct.insert(far.clone());
    assert!(ct.verify());
    assert_eq!(id, ct.search(far.view(), 1).neighbours()[0].index());
}

#[test]
fn test_duplicates() {
    let data = Array2::from_elem((10, 3), 0.25);
    let ct = CoverTreeBuilder::new().depth(5).build(data.view());

    assert!(ct.verify());
    let result = ct.search(data.row(0), 10);
    assert_eq!(10, result.neighbours().len());
    assert!(result.neighbours().iter().all(|n| n.dist() == 0.));
}

#[test]
fn test_search2() {
    let data = random_points(120, 4, 6);
    let queries = random_points(15, 4, 7);
    let ct = CoverTreeBuilder::new().build(data.view());

    let results = ct.search2(queries.view(), 3);
    assert_eq!(15, results.len());
    for (i, result) in results.iter().enumerate() {
        assert_eq!(i, result.index());
        let single = ct.search(queries.row(i), 3);
        assert_eq!(single.neighbours(), result.neighbours());
    }
}

#[test]
fn test_empty_and_single() {
    let ct = CoverTree::default();
    assert_eq!(0, ct.size());
    assert!(ct.search(array![1., 2.].view(), 3).neighbours().is_empty());

    let one = CoverTreeBuilder::new().build(array![[1., 2.]].view());
    let result = one.search(array![0., 0.].view(), 3);
    assert_eq!(1, result.neighbours().len());
    assert_eq!(0, result.neighbours()[0].index());
}

#[test]
fn test_search_angular() {
    // Centred points, so directions spread over the whole sphere.
    let data = random_points(600, 10, 8) * 2. - 1.;
    let ct = CoverTreeBuilder::new().metric(Metric::Angular).build(data.view());
    assert!(ct.verify());

    for idx in 0..data.nrows() {
        let result = ct.search(data.row(idx), 16);
        let found: Vec<usize> = result
            .neighbours()
            .iter()
            .map(|n| n.index())
            .filter(|&i| i != idx)
            .take(15)
            .collect();
        assert_eq!(brute_force(data.view(), idx, 15, Metric::Angular), found);

        for nb in result.neighbours() {
            assert_eq!(Metric::Angular.distance(data.row(idx), data.row(nb.index())), nb.dist());
        }
    }
}
