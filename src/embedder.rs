use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Configuration;
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::index::NeighborIndexBuilder;
use crate::network::{FrozenNetwork, Network};
use crate::trainer::{CancellationToken, StopReason, Trainer, TrainingObserver};
use crate::Scalar;

/// A trained network together with the configuration that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
    config: Configuration,
    network: FrozenNetwork,
}

impl Model {
    /// Pairs a configuration with a frozen network.
    pub fn new(config: Configuration, network: FrozenNetwork) -> Self {
        Self { config, network }
    }

    /// Configuration used for training.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// The frozen embedding function.
    pub fn network(&self) -> &FrozenNetwork {
        &self.network
    }

    /// Embeds `points`; see [`FrozenNetwork::transform`].
    pub fn transform(&self, points: ArrayView2<'_, Scalar>) -> Result<Array2<Scalar>> {
        self.network.transform(points)
    }

    /// Writes the model as JSON. Floats round-trip exactly.
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Reads a model written by [`Model::to_writer`].
    ///
    /// Layer shapes are checked after decoding: a model whose layers do not chain, or whose output
    /// width differs from `config.embedding_dims`, fails with [`Error::InvalidDimension`].
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let model: Self = serde_json::from_reader(reader)?;

        let params = model.network.parameters();
        params.validate()?;
        if params.output_dim() != model.config.embedding_dims {
            return Err(Error::InvalidDimension {
                row: params.layers().len() - 1,
                expected: model.config.embedding_dims,
                found: params.output_dim(),
            });
        }

        Ok(model)
    }

    /// Saves the model to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        self.to_writer(&mut writer)?;
        writer.flush()?;
        info!(path = %path.as_ref().display(), "model saved");
        Ok(())
    }

    /// Loads a model saved with [`Model::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let model = Self::from_reader(BufReader::new(File::open(path.as_ref())?))?;
        info!(path = %path.as_ref().display(), "model loaded");
        Ok(model)
    }
}

/// Outcome of [`Embedder::fit`].
#[derive(Clone, Debug, PartialEq)]
pub struct FitSummary {
    /// Loss of every completed epoch.
    pub loss_history: Vec<Scalar>,
    /// Loss of the restored checkpoint.
    pub best_loss: Scalar,
    /// Epoch of the restored checkpoint.
    pub best_epoch: Option<usize>,
    /// Why training ended.
    pub stop_reason: StopReason,
}

/// Fits a triplet-trained embedding network and applies it to new data.
///
/// ```no_run
/// use ctembed::{Configuration, Embedder};
/// use ndarray::Array2;
///
/// let data: Array2<f64> = Array2::zeros((1_000, 50));
/// let config = Configuration::builder().k(15).epochs(50).seed(7).build().unwrap();
///
/// let mut embedder = Embedder::new(config);
/// let embedding = embedder.fit_transform(data.view()).unwrap();
/// assert_eq!(embedding.dim(), (1_000, 2));
/// ```
#[derive(Debug, Default)]
pub struct Embedder {
    config: Configuration,
    model: Option<Model>,
    cancel: Option<CancellationToken>,
}

impl Embedder {
    /// Untrained embedder.
    pub fn new(config: Configuration) -> Self {
        Self {
            config,
            model: None,
            cancel: None,
        }
    }

    /// Embedder wrapping an existing model, e.g. one returned by [`Model::load`].
    pub fn from_model(model: Model) -> Self {
        Self {
            config: model.config.clone(),
            model: Some(model),
            cancel: None,
        }
    }

    /// Checks `token` between epochs of every subsequent fit.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// The trained model, if any.
    pub fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    /// Consumes the embedder and returns its model.
    pub fn into_model(self) -> Option<Model> {
        self.model
    }

    /// Returns `true` once a model is available.
    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    /// Trains a freshly initialised network on `data` (`N × D`).
    pub fn fit(&mut self, data: ArrayView2<'_, Scalar>) -> Result<FitSummary> {
        self.train(data, None, None)
    }

    /// Like [`Embedder::fit`], reporting every epoch to `observer`.
    pub fn fit_observed(
        &mut self,
        data: ArrayView2<'_, Scalar>,
        observer: &mut dyn TrainingObserver,
    ) -> Result<FitSummary> {
        self.train(data, None, Some(observer))
    }

    /// Continues training the current model on `data`.
    pub fn resume(&mut self, data: ArrayView2<'_, Scalar>) -> Result<FitSummary> {
        let network = match &self.model {
            Some(model) => model.network.clone().thaw(),
            None => return Err(Error::NotTrained),
        };
        self.train(data, Some(network), None)
    }

    /// Fits on `data` and returns its embedding (`N × E`, input row order).
    pub fn fit_transform(&mut self, data: ArrayView2<'_, Scalar>) -> Result<Array2<Scalar>> {
        self.fit(data)?;
        self.transform(data)
    }

    /// Embeds any `M × D` matrix with the trained network.
    pub fn transform(&self, data: ArrayView2<'_, Scalar>) -> Result<Array2<Scalar>> {
        match &self.model {
            Some(model) => model.transform(data),
            None => Err(Error::NotTrained),
        }
    }

    fn train(
        &mut self,
        data: ArrayView2<'_, Scalar>,
        network: Option<Network>,
        observer: Option<&mut dyn TrainingObserver>,
    ) -> Result<FitSummary> {
        let config = &self.config;
        config.validate()?;

        if data.nrows() < 2 || config.k >= data.nrows() {
            return Err(Error::InsufficientData {
                points: data.nrows(),
                k: config.k,
            });
        }
        let dataset = Dataset::from_view(data)?;

        let network = match network {
            Some(network) => {
                let expected = network.parameters().input_dim();
                if expected != dataset.dim() {
                    return Err(Error::InvalidDimension {
                        row: 0,
                        expected,
                        found: dataset.dim(),
                    });
                }
                network
            }
            None => Network::init(
                &config.architecture,
                dataset.dim(),
                config.embedding_dims,
                config.effective_seed(),
            ),
        };

        let mut builder = NeighborIndexBuilder::new()
            .k(config.k)
            .metric(config.metric)
            .strategy(config.index);
        if let Some(base) = config.tree_base {
            builder = builder.tree_base(base);
        }
        let index = builder.build(&dataset)?;

        let mut trainer = Trainer::new(config, &dataset, &index)?;
        if let Some(token) = &self.cancel {
            trainer = trainer.cancellation(token.clone());
        }
        if let Some(observer) = observer {
            trainer = trainer.observer(observer);
        }

        let outcome = trainer.run(network)?;
        let summary = FitSummary {
            loss_history: outcome.state.loss_history().to_vec(),
            best_loss: outcome.state.best_loss(),
            best_epoch: outcome.state.best_epoch(),
            stop_reason: outcome.stop_reason,
        };

        self.model = Some(Model::new(config.clone(), outcome.network));
        Ok(summary)
    }
}
