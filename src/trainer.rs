use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ndarray::{Array2, Axis};
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::index::NeighborIndex;
use crate::network::{FrozenNetwork, Network, Parameters};
use crate::optim::Adam;
use crate::sampler::{Triplet, TripletSampler};
use crate::Scalar;

/// Cooperative cancellation flag, checked by the trainer between epochs.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Training stops at the next epoch boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`CancellationToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Summary of one finished epoch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpochReport {
    /// Zero-based epoch.
    pub epoch: usize,
    /// Mean batch loss of the epoch.
    pub loss: Scalar,
    /// Best epoch loss so far, this epoch included.
    pub best_loss: Scalar,
    /// Whether this epoch produced a new checkpoint.
    pub improved: bool,
    /// Consecutive epochs without improvement.
    pub patience: usize,
    /// Negatives drawn without the neighbour check this epoch.
    pub unchecked_negatives: usize,
}

/// Receives a report after every epoch. Returning [`ControlFlow::Break`] stops training.
pub trait TrainingObserver {
    /// Called once the epoch's checkpoint has been updated.
    fn on_epoch_end(&mut self, report: &EpochReport) -> ControlFlow<()>;
}

impl<F> TrainingObserver for F
where
    F: FnMut(&EpochReport) -> ControlFlow<()>,
{
    fn on_epoch_end(&mut self, report: &EpochReport) -> ControlFlow<()> {
        self(report)
    }
}

/// Why training ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The loss stopped improving for the configured number of epochs.
    EarlyStopped,
    /// The epoch ceiling was reached.
    MaxEpochs,
    /// A [`CancellationToken`] was triggered.
    Cancelled,
    /// An observer asked to stop.
    Observer,
}

/// Loss history and best checkpoint of a run.
#[derive(Clone, Debug)]
pub struct TrainingState {
    history: Vec<Scalar>,
    best_loss: Scalar,
    best_epoch: Option<usize>,
    best: Parameters,
    patience: usize,
}

impl TrainingState {
    /// Starts tracking with `initial` as the fallback checkpoint.
    pub fn new(initial: Parameters) -> Self {
        Self {
            history: Vec::new(),
            best_loss: Scalar::INFINITY,
            best_epoch: None,
            best: initial,
            patience: 0,
        }
    }

    /// Records an epoch loss. A loss below `best - min_delta` replaces the checkpoint with a copy
    /// of `evaluated`, the parameters the loss was measured on, and resets patience; anything else
    /// increments patience. Non-finite parameters never become the checkpoint.
    pub fn record(&mut self, loss: Scalar, evaluated: &Parameters, min_delta: Scalar) -> bool {
        let epoch = self.history.len();
        self.history.push(loss);

        let improved = loss < self.best_loss - min_delta && evaluated.is_finite();
        if improved {
            self.best_loss = loss;
            self.best_epoch = Some(epoch);
            self.best = evaluated.clone();
            self.patience = 0;
        } else {
            self.patience += 1;
        }

        improved
    }

    /// Number of completed epochs.
    pub fn epochs_completed(&self) -> usize {
        self.history.len()
    }

    /// Epoch losses in order.
    pub fn loss_history(&self) -> &[Scalar] {
        &self.history
    }

    /// Best epoch loss, infinite before the first epoch.
    pub fn best_loss(&self) -> Scalar {
        self.best_loss
    }

    /// Epoch of the best checkpoint.
    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    /// Consecutive epochs without improvement.
    pub fn patience(&self) -> usize {
        self.patience
    }

    /// Best checkpoint.
    pub fn best_parameters(&self) -> &Parameters {
        &self.best
    }
}

/// Result of a successful run.
#[derive(Clone, Debug)]
pub struct TrainingOutcome {
    /// Network frozen at the best checkpoint.
    pub network: FrozenNetwork,
    /// Final training state.
    pub state: TrainingState,
    /// Why the run ended.
    pub stop_reason: StopReason,
}

/// Drives Adam over triplet batches until early stopping, the epoch ceiling, cancellation or an
/// observer ends the run.
pub struct Trainer<'a> {
    config: &'a Configuration,
    data: &'a Dataset,
    sampler: TripletSampler<'a>,
    cancel: Option<CancellationToken>,
    observer: Option<&'a mut dyn TrainingObserver>,
}

impl<'a> std::fmt::Debug for Trainer<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trainer")
            .field("config", self.config)
            .field("sampler", &self.sampler)
            .field("cancel", &self.cancel)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl<'a> Trainer<'a> {
    /// Prepares a run over `data` and its neighbour index.
    pub fn new(config: &'a Configuration, data: &'a Dataset, index: &'a NeighborIndex) -> Result<Self> {
        config.validate()?;

        let sampler = TripletSampler::new(data, index, config.effective_seed())?
            .positive(config.positive)
            .negative(config.negative)
            .retries(config.negative_retries);

        Ok(Self {
            config,
            data,
            sampler,
            cancel: None,
            observer: None,
        })
    }

    /// Checks `token` at every epoch boundary.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Reports every epoch to `observer`.
    pub fn observer(mut self, observer: &'a mut dyn TrainingObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Trains `network` and returns it frozen at the best checkpoint.
    ///
    /// The checkpoint candidate of an epoch is the parameters its final batch was evaluated on.
    /// A non-finite loss, gradient or updated parameter aborts with [`Error::DivergedTraining`];
    /// the error carries the best checkpoint seen so far, never the diverged parameters.
    pub fn run(mut self, mut network: Network) -> Result<TrainingOutcome> {
        let config = self.config;
        let mut optimiser = Adam::new(config.learning_rate, network.parameters());
        let mut state = TrainingState::new(network.snapshot());
        let mut stop_reason = StopReason::MaxEpochs;

        info!(
            points = self.data.len(),
            parameters = network.parameters().count(),
            epochs = config.epochs,
            batch_size = config.batch_size,
            "training started"
        );
        let start = Instant::now();

        for epoch in 0..config.epochs {
            if self.cancel.as_ref().map_or(false, CancellationToken::is_cancelled) {
                info!(epoch, "training cancelled");
                stop_reason = StopReason::Cancelled;
                break;
            }

            let order = self.sampler.epoch_order(epoch);
            let mut loss_sum = 0.;
            let mut batches = 0usize;
            let mut unchecked = 0usize;
            let mut evaluated = None;
            let last = order.len().saturating_sub(1) / config.batch_size;

            for (b, anchors) in order.chunks(config.batch_size).enumerate() {
                let (triplets, stats) = self.sampler.sample_with_stats(epoch, anchors);
                unchecked += stats.unchecked_negatives;
                if b == last {
                    evaluated = Some(network.snapshot());
                }

                match self.step(&mut network, &mut optimiser, &triplets) {
                    Some(loss) => {
                        loss_sum += loss;
                        batches += 1;
                    }
                    None => return Err(diverged(epoch, &state)),
                }
            }

            let loss = loss_sum / batches.max(1) as Scalar;
            if !loss.is_finite() {
                return Err(diverged(epoch, &state));
            }

            let evaluated = match evaluated {
                Some(params) => params,
                None => network.snapshot(),
            };
            let improved = state.record(loss, &evaluated, config.min_delta);
            if unchecked > 0 {
                debug!(epoch, unchecked, "negatives drawn without neighbour check");
            }
            debug!(
                epoch,
                loss,
                best = state.best_loss(),
                patience = state.patience(),
                "epoch finished"
            );

            let report = EpochReport {
                epoch,
                loss,
                best_loss: state.best_loss(),
                improved,
                patience: state.patience(),
                unchecked_negatives: unchecked,
            };

            if let Some(observer) = self.observer.as_mut() {
                if observer.on_epoch_end(&report).is_break() {
                    stop_reason = StopReason::Observer;
                    break;
                }
            }

            if state.patience() >= config.n_epochs_without_progress {
                info!(
                    epoch,
                    best_epoch = ?state.best_epoch(),
                    best_loss = state.best_loss(),
                    "no progress, stopping early"
                );
                stop_reason = StopReason::EarlyStopped;
                break;
            }
        }

        network.restore(state.best_parameters().clone());

        info!(
            epochs = state.epochs_completed(),
            best_loss = state.best_loss(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "training finished"
        );

        Ok(TrainingOutcome {
            network: network.freeze(),
            state,
            stop_reason,
        })
    }

    /// One optimiser step over a batch. Returns `None` if the loss or any gradient is not finite
    /// (`network` is left untouched), or if the update overflowed a parameter.
    fn step(&self, network: &mut Network, optimiser: &mut Adam, triplets: &[Triplet]) -> Option<Scalar> {
        let rows = |role: fn(&Triplet) -> usize| -> Array2<Scalar> {
            let ids: Vec<usize> = triplets.iter().map(role).collect();
            self.data.view().select(Axis(0), &ids)
        };

        let anchors = rows(|t| t.anchor);
        let positives = rows(|t| t.positive);
        let negatives = rows(|t| t.negative);

        // Shared weights: the same function embeds all three roles.
        let (emb_a, cache_a) = network.forward_cached(anchors.view());
        let (emb_p, cache_p) = network.forward_cached(positives.view());
        let (emb_n, cache_n) = network.forward_cached(negatives.view());

        let out = self
            .config
            .loss
            .evaluate(emb_a.view(), emb_p.view(), emb_n.view(), self.config.margin);
        if !out.value.is_finite() {
            return None;
        }

        let mut grads = network.backward(&cache_a, out.anchor);
        grads.accumulate(&network.backward(&cache_p, out.positive));
        grads.accumulate(&network.backward(&cache_n, out.negative));
        if !grads.is_finite() {
            return None;
        }

        optimiser.step(network.parameters_mut(), &grads);
        if !network.parameters().is_finite() {
            return None;
        }
        Some(out.value)
    }
}

fn diverged(epoch: usize, state: &TrainingState) -> Error {
    warn!(
        epoch,
        best_epoch = ?state.best_epoch(),
        "loss is not finite, returning best checkpoint"
    );

    Error::DivergedTraining {
        epoch,
        checkpoint: Box::new(Network::from_parameters(state.best_parameters().clone()).freeze()),
    }
}
