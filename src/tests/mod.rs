#![allow(unused_imports)]
use ndarray::{Array2, ArrayView2};

use crate::{Architecture, Activation, Configuration, ConfigurationBuilder, Metric, Scalar};

mod embedder;
mod index;
mod tree;

/// Uniform points in the unit hypercube.
pub(crate) fn random_points(rows: usize, cols: usize, seed: u128) -> Array2<Scalar> {
    let mut rng = oorandom::Rand64::new(seed);
    Array2::from_shape_simple_fn((rows, cols), || rng.rand_float())
}

/// Gaussian-ish blobs around `centres`, `per_blob` points each, blob by blob.
pub(crate) fn blobs(centres: &[[Scalar; 3]], per_blob: usize, spread: Scalar, seed: u128) -> Array2<Scalar> {
    let mut rng = oorandom::Rand64::new(seed);
    Array2::from_shape_fn((centres.len() * per_blob, 3), |(i, j)| {
        let jitter = (rng.rand_float() + rng.rand_float() + rng.rand_float()) / 3. - 0.5;
        centres[i / per_blob][j] + spread * jitter
    })
}

/// Exact neighbours of point `idx`, self excluded, ties broken by index.
pub(crate) fn brute_force(data: ArrayView2<'_, Scalar>, idx: usize, k: usize, metric: Metric) -> Vec<usize> {
    let mut all: Vec<(Scalar, usize)> = data
        .outer_iter()
        .enumerate()
        .filter(|(j, _)| *j != idx)
        .map(|(j, row)| (metric.distance(data.row(idx), row), j))
        .collect();
    all.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then(a.1.cmp(&b.1)));
    all.into_iter().take(k).map(|(_, j)| j).collect()
}

/// Small network and short schedule so that tests run quickly.
pub(crate) fn quick_config() -> ConfigurationBuilder {
    Configuration::builder()
        .architecture(Architecture::Custom {
            hidden: vec![16, 16],
            activation: Activation::Selu,
        })
        .k(5)
        .batch_size(16)
        .epochs(30)
        .n_epochs_without_progress(10)
        .learning_rate(0.01)
        .seed(42)
}
