//! A library for low-dimensional embeddings learnt from nearest-neighbour triplets.
//!
//! Points are indexed with a simplified cover tree, `(anchor, positive, negative)` triplets are
//! drawn from the neighbour lists, and a small dense network is trained against a triplet-ranking
//! loss so that neighbours land closer together than non-neighbours. The trained network is a
//! plain function of its input, so it embeds out-of-sample points without retraining.
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    rustdoc::broken_intra_doc_links
)]

type Scalar = f64;

mod config;
pub use config::{Configuration, ConfigurationBuilder, DEFAULT_SEED};

mod dataset;
pub use dataset::Dataset;

mod embedder;
pub use embedder::{Embedder, FitSummary, Model};

mod error;
pub use error::{Error, Result};

mod index;
pub use index::{IndexStrategy, NeighborIndex, NeighborIndexBuilder};

mod loss;
pub use loss::{Loss, LossOutput};

mod metric;
pub use metric::Metric;

mod network;
pub use network::{Activation, Architecture, Dense, FrozenNetwork, Network, Parameters};

mod optim;

mod sampler;
pub use sampler::{NegativeSelection, PositiveSelection, SampleStats, Triplet, TripletSampler};

#[cfg(test)]
mod tests;

mod trainer;
pub use trainer::{
    CancellationToken, EpochReport, StopReason, Trainer, TrainingObserver, TrainingOutcome,
    TrainingState,
};

mod tree;
pub use tree::{CoverTree, CoverTreeBuilder, Neighbour, QueryResult};
