use thiserror::Error;

use crate::network::FrozenNetwork;

/// Convenience alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while validating input, building the neighbour index, training or embedding.
#[derive(Debug, Error)]
pub enum Error {
    /// A point does not have the dimension shared by the rest of the data (or by the model), or
    /// the layers of a persisted model do not fit together.
    #[error("invalid dimension at row {row}: expected {expected} columns, found {found}")]
    InvalidDimension {
        /// Offending row, or offending layer for a persisted model.
        row: usize,
        /// Dimension expected from the first row or the trained model.
        expected: usize,
        /// Dimension actually found.
        found: usize,
    },

    /// A point contains a NaN or an infinite coordinate.
    #[error("non-finite value at row {row}, column {column}")]
    NonFiniteInput {
        /// Offending row.
        row: usize,
        /// Offending column.
        column: usize,
    },

    /// Too few points to draw triplets with the requested neighbourhood size.
    #[error("insufficient data: {points} points cannot support k = {k} neighbours")]
    InsufficientData {
        /// Number of points supplied.
        points: usize,
        /// Requested neighbour count; 0 when no neighbourhood was requested, as for an empty
        /// [`Dataset`](crate::Dataset).
        k: usize,
    },

    /// A configuration value is outside its valid range.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The loss became non-finite. Carries the best checkpoint observed before divergence.
    #[error("training diverged at epoch {epoch}: loss is not finite")]
    DivergedTraining {
        /// Epoch (zero based) in which the non-finite value appeared.
        epoch: usize,
        /// Best finite parameter snapshot, frozen.
        checkpoint: Box<FrozenNetwork>,
    },

    /// Inference was requested before a network was trained or loaded.
    #[error("the embedder has not been trained")]
    NotTrained,

    /// Failure while reading or writing a persisted model.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Failure while encoding or decoding a persisted model.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}
