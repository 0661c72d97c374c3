use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::index::IndexStrategy;
use crate::loss::Loss;
use crate::network::Architecture;
use crate::sampler::{NegativeSelection, PositiveSelection};
use crate::{Metric, Scalar};

/// Seed used when none is configured, so every run is reproducible.
pub const DEFAULT_SEED: u64 = 0x5eed_1234;

/// Parameters of a training run. Persisted alongside the trained network.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Output dimension `E`.
    pub embedding_dims: usize,
    /// Neighbours per point in the index.
    pub k: usize,
    /// Input-space distance used by the index.
    pub metric: Metric,
    /// Neighbour search backend.
    pub index: IndexStrategy,
    /// Cover tree base; `None` keeps the tree's default.
    pub tree_base: Option<Scalar>,
    /// Hidden layer layout.
    pub architecture: Architecture,
    /// Triplet-ranking loss.
    pub loss: Loss,
    /// Margin of the hinge losses.
    pub margin: Scalar,
    /// Triplets per optimiser step.
    pub batch_size: usize,
    /// Hard ceiling on epochs.
    pub epochs: usize,
    /// Epochs without improvement before training stops.
    pub n_epochs_without_progress: usize,
    /// Minimum decrease of the epoch loss that counts as improvement.
    pub min_delta: Scalar,
    /// Adam learning rate.
    pub learning_rate: Scalar,
    /// Seed for every random draw; `None` uses [`DEFAULT_SEED`].
    pub seed: Option<u64>,
    /// Positive sampling strategy.
    pub positive: PositiveSelection,
    /// Negative sampling strategy.
    pub negative: NegativeSelection,
    /// Redraws of a rejected negative before an unchecked draw is accepted.
    pub negative_retries: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            embedding_dims: 2,
            k: 150,
            metric: Metric::Euclidean,
            index: IndexStrategy::default(),
            tree_base: None,
            architecture: Architecture::default(),
            loss: Loss::default(),
            margin: 1.,
            batch_size: 128,
            epochs: 1000,
            n_epochs_without_progress: 20,
            min_delta: 0.,
            learning_rate: 0.001,
            seed: None,
            positive: PositiveSelection::default(),
            negative: NegativeSelection::default(),
            negative_retries: 10,
        }
    }
}

impl Configuration {
    /// Starts a builder from the defaults.
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::new()
    }

    /// The configured seed or [`DEFAULT_SEED`].
    pub fn effective_seed(&self) -> u64 {
        self.seed.unwrap_or(DEFAULT_SEED)
    }

    /// Checks every value range. Data-dependent checks happen at fit time.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidConfiguration(msg.to_string()));

        if self.embedding_dims == 0 {
            return invalid("embedding_dims must be positive");
        }
        if self.k == 0 {
            return invalid("k must be positive");
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be positive");
        }
        if self.epochs == 0 {
            return invalid("epochs must be positive");
        }
        if self.n_epochs_without_progress == 0 {
            return invalid("n_epochs_without_progress must be positive");
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.) {
            return invalid("learning_rate must be positive and finite");
        }
        if !(self.margin.is_finite() && self.margin >= 0.) {
            return invalid("margin must be non-negative and finite");
        }
        if !(self.min_delta.is_finite() && self.min_delta >= 0.) {
            return invalid("min_delta must be non-negative and finite");
        }
        if let Some(base) = self.tree_base {
            if !(base.is_finite() && base > 1.) {
                return invalid("tree_base must be greater than one");
            }
        }
        if let Architecture::Custom { hidden, .. } = &self.architecture {
            if hidden.iter().any(|&w| w == 0) {
                return invalid("custom architecture has a zero-width layer");
            }
        }
        if let NegativeSelection::Hard { candidates } = self.negative {
            if candidates == 0 {
                return invalid("hard negative selection needs at least one candidate");
            }
        }

        Ok(())
    }
}

/// A build struct for a [`Configuration`]. Unset values keep their defaults.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigurationBuilder {
    embedding_dims: Option<usize>,
    k: Option<usize>,
    metric: Option<Metric>,
    index: Option<IndexStrategy>,
    tree_base: Option<Scalar>,
    architecture: Option<Architecture>,
    loss: Option<Loss>,
    margin: Option<Scalar>,
    batch_size: Option<usize>,
    epochs: Option<usize>,
    n_epochs_without_progress: Option<usize>,
    min_delta: Option<Scalar>,
    learning_rate: Option<Scalar>,
    seed: Option<u64>,
    positive: Option<PositiveSelection>,
    negative: Option<NegativeSelection>,
    negative_retries: Option<usize>,
}

impl ConfigurationBuilder {
    /// Creates a builder with default parameters.
    pub fn new() -> Self {
        Self {
            ..Default::default()
        }
    }

    /// Sets the output dimension.
    pub fn embedding_dims(mut self, embedding_dims: usize) -> Self {
        self.embedding_dims = Some(embedding_dims);
        self
    }

    /// Sets the neighbour count.
    pub fn k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    /// Sets the input-space distance.
    pub fn metric(mut self, metric: Metric) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Sets the neighbour search backend.
    pub fn index(mut self, index: IndexStrategy) -> Self {
        self.index = Some(index);
        self
    }

    /// Sets the cover tree base.
    pub fn tree_base(mut self, base: Scalar) -> Self {
        self.tree_base = Some(base);
        self
    }

    /// Sets the network architecture.
    pub fn architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = Some(architecture);
        self
    }

    /// Sets the loss.
    pub fn loss(mut self, loss: Loss) -> Self {
        self.loss = Some(loss);
        self
    }

    /// Sets the hinge margin.
    pub fn margin(mut self, margin: Scalar) -> Self {
        self.margin = Some(margin);
        self
    }

    /// Sets the batch size.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Sets the epoch ceiling.
    pub fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = Some(epochs);
        self
    }

    /// Sets the early-stopping patience.
    pub fn n_epochs_without_progress(mut self, patience: usize) -> Self {
        self.n_epochs_without_progress = Some(patience);
        self
    }

    /// Sets the improvement threshold.
    pub fn min_delta(mut self, min_delta: Scalar) -> Self {
        self.min_delta = Some(min_delta);
        self
    }

    /// Sets the learning rate.
    pub fn learning_rate(mut self, learning_rate: Scalar) -> Self {
        self.learning_rate = Some(learning_rate);
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the positive sampling strategy.
    pub fn positive(mut self, positive: PositiveSelection) -> Self {
        self.positive = Some(positive);
        self
    }

    /// Sets the negative sampling strategy.
    pub fn negative(mut self, negative: NegativeSelection) -> Self {
        self.negative = Some(negative);
        self
    }

    /// Sets the negative retry cap.
    pub fn negative_retries(mut self, retries: usize) -> Self {
        self.negative_retries = Some(retries);
        self
    }

    /// Assembles and validates the configuration.
    pub fn build(self) -> Result<Configuration> {
        let d = Configuration::default();
        let config = Configuration {
            embedding_dims: self.embedding_dims.unwrap_or(d.embedding_dims),
            k: self.k.unwrap_or(d.k),
            metric: self.metric.unwrap_or(d.metric),
            index: self.index.unwrap_or(d.index),
            tree_base: self.tree_base.or(d.tree_base),
            architecture: self.architecture.unwrap_or(d.architecture),
            loss: self.loss.unwrap_or(d.loss),
            margin: self.margin.unwrap_or(d.margin),
            batch_size: self.batch_size.unwrap_or(d.batch_size),
            epochs: self.epochs.unwrap_or(d.epochs),
            n_epochs_without_progress: self
                .n_epochs_without_progress
                .unwrap_or(d.n_epochs_without_progress),
            min_delta: self.min_delta.unwrap_or(d.min_delta),
            learning_rate: self.learning_rate.unwrap_or(d.learning_rate),
            seed: self.seed.or(d.seed),
            positive: self.positive.unwrap_or(d.positive),
            negative: self.negative.unwrap_or(d.negative),
            negative_retries: self.negative_retries.unwrap_or(d.negative_retries),
        };

        config.validate()?;
        Ok(config)
    }
}
