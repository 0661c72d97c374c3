use crate::Scalar;
use ndarray::ArrayView1;

use ndarray_stats::DeviationExt;
use serde::{Deserialize, Serialize};

/// Enum for distance functions in the input space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    /// L-1 or Manhattan distance. See [\[Wikipedia\]](https://en.wikipedia.org/wiki/Taxicab_geometry).
    Manhattan,
    /// L-2 or Euclidean distance. See [\[Wikipedia\]](https://en.wikipedia.org/wiki/Euclidean_distance)
    Euclidean,
    /// L-inf or Chebyshev distance. See [\[Wikipedia\]](https://en.wikipedia.org/wiki/Chebyshev_distance)
    Chebyshev,
    /// Cosine distance, `1 - cos(a, b)`.
    Angular,
}

impl Default for Metric {
    fn default() -> Self {
        Metric::Euclidean
    }
}

impl Metric {
    /// Calculate the distance between two points of equal, non-zero length.
    ///
    /// Points of differing length are at infinite distance; callers validate shapes beforehand.
    pub fn distance(&self, a: ArrayView1<'_, Scalar>, b: ArrayView1<'_, Scalar>) -> Scalar {
        match self {
            Metric::Manhattan => a.l1_dist(&b).unwrap_or(Scalar::INFINITY),
            Metric::Euclidean => a.l2_dist(&b).unwrap_or(Scalar::INFINITY),
            Metric::Chebyshev => a.linf_dist(&b).unwrap_or(Scalar::INFINITY),
            Metric::Angular => {
                if a.len() != b.len() {
                    return Scalar::INFINITY;
                }

                let norms = a.dot(&a).sqrt() * b.dot(&b).sqrt();
                if norms == 0. {
                    // Zero vectors have no direction.
                    return if a == b { 0. } else { 1. };
                }

                // floating point issue (e.g. 1.0000000000000002).
                let cos = (a.dot(&b) / norms).max(-1.).min(1.);
                1. - cos
            }
        }
    }
}
