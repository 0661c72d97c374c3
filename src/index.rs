use std::time::Instant;

use ndarray::{Array2, ArrayView1};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::tree::{offer, CoverTree, CoverTreeBuilder, Neighbour};
use crate::{Metric, Scalar};

/// How neighbour lists are computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexStrategy {
    /// Brute-force scan over all points. Quadratic, only sensible for small inputs.
    Exact,
    /// Search a simplified cover tree built over the dataset.
    CoverTree,
    /// Use [`IndexStrategy::Exact`] below `exact_below` points and a cover tree otherwise.
    Auto {
        /// Point count at which the cover tree takes over.
        exact_below: usize,
    },
}

impl Default for IndexStrategy {
    fn default() -> Self {
        IndexStrategy::Auto { exact_below: 2_000 }
    }
}

#[derive(Clone, Debug)]
enum Backend {
    Exact(Array2<Scalar>),
    Tree(CoverTree),
}

impl Backend {
    fn search(&self, query: ArrayView1<'_, Scalar>, k: usize, metric: Metric) -> Vec<Neighbour> {
        match self {
            Backend::Exact(points) => {
                let mut result = Vec::with_capacity(k + 1);
                for (idx, row) in points.outer_iter().enumerate() {
                    offer(&mut result, Neighbour::new(idx, metric.distance(query, row)), k);
                }
                result
            }
            Backend::Tree(tree) => tree.exe_search(query, k),
        }
    }
}

/// Immutable k-nearest neighbour lists for every point of a [`Dataset`].
///
/// List `i` never contains `i` and holds `min(k, N - 1)` identifiers ordered by distance.
#[derive(Clone, Debug)]
pub struct NeighborIndex {
    k: usize,
    dim: usize,
    metric: Metric,
    neighbours: Vec<Vec<usize>>,
    distances: Vec<Vec<Scalar>>,
    backend: Backend,
}

impl NeighborIndex {
    /// Builds an index with default options.
    pub fn build(data: &Dataset, k: usize, metric: Metric, strategy: IndexStrategy) -> Result<Self> {
        NeighborIndexBuilder::new()
            .k(k)
            .metric(metric)
            .strategy(strategy)
            .build(data)
    }

    /// Effective neighbour count, `min(k, N - 1)`.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        self.neighbours.len()
    }

    /// Returns `true` if no point is indexed.
    pub fn is_empty(&self) -> bool {
        self.neighbours.is_empty()
    }

    /// Distance function used by the index.
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Neighbour identifiers of point `idx`, closest first.
    pub fn neighbours(&self, idx: usize) -> &[usize] {
        &self.neighbours[idx]
    }

    /// Distances matching [`NeighborIndex::neighbours`].
    pub fn distances(&self, idx: usize) -> &[Scalar] {
        &self.distances[idx]
    }

    /// Returns `true` if `candidate` is in the neighbour list of `anchor`.
    pub fn contains(&self, anchor: usize, candidate: usize) -> bool {
        self.neighbours[anchor].contains(&candidate)
    }

    /// Finds the `k` indexed points closest to an arbitrary query vector.
    pub fn query(&self, query: ArrayView1<'_, Scalar>, k: usize) -> Result<Vec<Neighbour>> {
        if query.len() != self.dim {
            return Err(Error::InvalidDimension {
                row: 0,
                expected: self.dim,
                found: query.len(),
            });
        }

        if let Some(column) = query.iter().position(|v| !v.is_finite()) {
            return Err(Error::NonFiniteInput { row: 0, column });
        }

        Ok(self.backend.search(query, k.min(self.len()), self.metric))
    }
}

/// A build struct for a [`NeighborIndex`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NeighborIndexBuilder {
    k: Option<usize>,
    metric: Option<Metric>,
    strategy: Option<IndexStrategy>,
    tree_base: Option<Scalar>,
}

impl NeighborIndexBuilder {
    /// Creates a builder with default parameters.
    pub fn new() -> Self {
        Self {
            ..Default::default()
        }
    }

    /// Sets the requested neighbour count.
    pub fn k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    /// Sets the distance function.
    pub fn metric(mut self, metric: Metric) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Sets the search strategy.
    pub fn strategy(mut self, strategy: IndexStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Sets the cover tree base.
    pub fn tree_base(mut self, base: Scalar) -> Self {
        self.tree_base = Some(base);
        self
    }

    /// Computes the neighbour lists of every point in `data`, in parallel across points.
    ///
    /// `k >= N` is not an error: every list then holds the other `N - 1` points.
    pub fn build(self, data: &Dataset) -> Result<NeighborIndex> {
        let requested = self.k.unwrap_or(150);
        if requested == 0 {
            return Err(Error::InvalidConfiguration(
                "neighbour count k must be positive".to_string(),
            ));
        }

        let metric = self.metric.unwrap_or_default();
        let n = data.len();
        let k = requested.min(n.saturating_sub(1));
        if k < requested {
            warn!(requested, k, points = n, "k clamped to the number of other points");
        }

        let use_tree = match self.strategy.unwrap_or_default() {
            IndexStrategy::Exact => false,
            IndexStrategy::CoverTree => true,
            IndexStrategy::Auto { exact_below } => n >= exact_below,
        };

        let start = Instant::now();
        let backend = if use_tree {
            let mut builder = CoverTreeBuilder::new().metric(metric);
            if let Some(base) = self.tree_base {
                builder = builder.base(base);
            }
            Backend::Tree(builder.build(data.view()))
        } else {
            Backend::Exact(data.view().to_owned())
        };
        debug!(
            tree = use_tree,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "neighbour backend ready"
        );

        // One extra neighbour since a point always finds itself.
        let lists: Vec<Vec<Neighbour>> = (0..n)
            .into_par_iter()
            .map(|idx| {
                let mut found = backend.search(data.point(idx), k + 1, metric);
                found.retain(|nb| nb.index() != idx);
                found.truncate(k);
                found
            })
            .collect();

        let (neighbours, distances): (Vec<Vec<usize>>, Vec<Vec<Scalar>>) = lists
            .into_iter()
            .map(|list| {
                list.into_iter()
                    .map(|nb| (nb.index(), nb.dist()))
                    .unzip::<_, _, Vec<usize>, Vec<Scalar>>()
            })
            .unzip();

        info!(
            points = n,
            k,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "neighbour index built"
        );

        Ok(NeighborIndex {
            k,
            dim: data.dim(),
            metric,
            neighbours,
            distances,
            backend,
        })
    }
}
