use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::error::{Error, Result};
use crate::Scalar;

/// An ordered, validated collection of points sharing one dimension.
///
/// Row order defines the point identifiers `0..len()` used by the neighbour index, the sampler and
/// the final embedding.
#[derive(Clone, Debug)]
pub struct Dataset {
    points: Array2<Scalar>,
}

impl Dataset {
    /// Wraps a matrix of points, one point per row.
    ///
    /// Fails with [`Error::InsufficientData`] for an empty matrix, [`Error::InvalidDimension`] for
    /// zero columns and [`Error::NonFiniteInput`] if any coordinate is NaN or infinite.
    pub fn new(points: Array2<Scalar>) -> Result<Self> {
        if points.nrows() == 0 {
            return Err(Error::InsufficientData { points: 0, k: 0 });
        }

        if points.ncols() == 0 {
            return Err(Error::InvalidDimension {
                row: 0,
                expected: 1,
                found: 0,
            });
        }

        check_finite(points.view())?;

        Ok(Self { points })
    }

    /// Validates and copies a matrix view.
    pub fn from_view(points: ArrayView2<'_, Scalar>) -> Result<Self> {
        Self::new(points.to_owned())
    }

    /// Builds a dataset from row vectors, rejecting ragged input with [`Error::InvalidDimension`].
    pub fn from_rows(rows: &[Vec<Scalar>]) -> Result<Self> {
        let dim = match rows.first() {
            Some(first) => first.len(),
            None => return Err(Error::InsufficientData { points: 0, k: 0 }),
        };

        let mut flat = Vec::with_capacity(rows.len() * dim);
        for (row, point) in rows.iter().enumerate() {
            if point.len() != dim {
                return Err(Error::InvalidDimension {
                    row,
                    expected: dim,
                    found: point.len(),
                });
            }
            flat.extend_from_slice(point);
        }

        let points = Array2::from_shape_vec((rows.len(), dim), flat).map_err(|_| {
            Error::InvalidDimension {
                row: 0,
                expected: dim,
                found: 0,
            }
        })?;

        Self::new(points)
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.nrows()
    }

    /// Whether the dataset has no points. Construction rejects empty input, so this is `false`.
    pub fn is_empty(&self) -> bool {
        self.points.nrows() == 0
    }

    /// Dimension `D` of every point.
    pub fn dim(&self) -> usize {
        self.points.ncols()
    }

    /// Returns the point with identifier `idx`.
    pub fn point(&self, idx: usize) -> ArrayView1<'_, Scalar> {
        self.points.row(idx)
    }

    /// Returns all points as a matrix view.
    pub fn view(&self) -> ArrayView2<'_, Scalar> {
        self.points.view()
    }

    /// Consumes the dataset and returns the underlying matrix.
    pub fn into_inner(self) -> Array2<Scalar> {
        self.points
    }
}

/// Rejects NaN and infinite coordinates.
pub(crate) fn check_finite(points: ArrayView2<'_, Scalar>) -> Result<()> {
    for ((row, column), value) in points.indexed_iter() {
        if !value.is_finite() {
            return Err(Error::NonFiniteInput { row, column });
        }
    }
    Ok(())
}

/// Checks that a matrix of queries matches the dimension `dim` and is finite.
pub(crate) fn check_queries(points: ArrayView2<'_, Scalar>, dim: usize) -> Result<()> {
    if points.ncols() != dim {
        return Err(Error::InvalidDimension {
            row: 0,
            expected: dim,
            found: points.ncols(),
        });
    }
    check_finite(points)
}
