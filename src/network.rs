use ndarray::parallel::prelude::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::dataset::check_queries;
use crate::error::{Error, Result};
use crate::sampler::stream;
use crate::Scalar;

const SELU_LAMBDA: Scalar = 1.050_700_987_355_480_5;
const SELU_ALPHA: Scalar = 1.673_263_242_354_377_3;
const INIT: u64 = 0x696e_6974;
const TRANSFORM_CHUNK: usize = 1024;

/// Element-wise non-linearity of a hidden layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Activation {
    /// `max(0, z)`.
    Relu,
    /// Scaled exponential linear unit.
    Selu,
    /// Hyperbolic tangent.
    Tanh,
    /// Identity.
    Linear,
}

impl Activation {
    #[inline]
    fn apply(self, z: Scalar) -> Scalar {
        match self {
            Activation::Relu => z.max(0.),
            Activation::Selu => {
                if z > 0. {
                    SELU_LAMBDA * z
                } else {
                    SELU_LAMBDA * SELU_ALPHA * z.exp_m1()
                }
            }
            Activation::Tanh => z.tanh(),
            Activation::Linear => z,
        }
    }

    #[inline]
    fn derivative(self, z: Scalar) -> Scalar {
        match self {
            Activation::Relu => {
                if z > 0. {
                    1.
                } else {
                    0.
                }
            }
            Activation::Selu => {
                if z > 0. {
                    SELU_LAMBDA
                } else {
                    SELU_LAMBDA * SELU_ALPHA * z.exp()
                }
            }
            Activation::Tanh => {
                let t = z.tanh();
                1. - t * t
            }
            Activation::Linear => 1.,
        }
    }
}

/// Layout of the hidden layers. The output layer is always linear with `embedding_dims` units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Architecture {
    /// Three SELU layers of 128 units.
    Szubert,
    /// ReLU layers of 2000, 1000 and 500 units.
    Hinton,
    /// ReLU layers of 500, 500 and 2000 units.
    Maaten,
    /// Arbitrary hidden widths sharing one activation.
    Custom {
        /// Hidden layer widths, input side first.
        hidden: Vec<usize>,
        /// Activation of every hidden layer.
        activation: Activation,
    },
}

impl Default for Architecture {
    fn default() -> Self {
        Architecture::Szubert
    }
}

impl Architecture {
    /// Hidden widths and their activation.
    pub fn hidden_layers(&self) -> (Vec<usize>, Activation) {
        match self {
            Architecture::Szubert => (vec![128, 128, 128], Activation::Selu),
            Architecture::Hinton => (vec![2000, 1000, 500], Activation::Relu),
            Architecture::Maaten => (vec![500, 500, 2000], Activation::Relu),
            Architecture::Custom { hidden, activation } => (hidden.clone(), *activation),
        }
    }
}

/// A fully connected layer `act(x · W + b)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dense {
    weights: Array2<Scalar>,
    bias: Array1<Scalar>,
    activation: Activation,
}

impl Dense {
    fn init<R: Rng>(inputs: usize, outputs: usize, activation: Activation, rng: &mut R) -> Self {
        // LeCun uniform for SELU, Glorot uniform otherwise.
        let limit = match activation {
            Activation::Selu => (3. / inputs as Scalar).sqrt(),
            _ => (6. / (inputs + outputs) as Scalar).sqrt(),
        };

        let weights = Array2::from_shape_simple_fn((inputs, outputs), || rng.gen_range(-limit..limit));

        Self {
            weights,
            bias: Array1::zeros(outputs),
            activation,
        }
    }

    /// Input width.
    pub fn inputs(&self) -> usize {
        self.weights.nrows()
    }

    /// Output width.
    pub fn outputs(&self) -> usize {
        self.weights.ncols()
    }

    /// Activation of the layer.
    pub fn activation(&self) -> Activation {
        self.activation
    }

    fn pre_activation(&self, x: ArrayView2<'_, Scalar>) -> Array2<Scalar> {
        let mut z = x.dot(&self.weights);
        z += &self.bias;
        z
    }
}

/// Learnable parameters `θ`. A value: cloning takes a checkpoint, assigning restores one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    layers: Vec<Dense>,
}

impl Parameters {
    /// Layers from input to output.
    pub fn layers(&self) -> &[Dense] {
        &self.layers
    }

    /// Total number of scalars.
    pub fn count(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.weights.len() + l.bias.len())
            .sum()
    }

    /// Returns `true` if no weight or bias is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.layers
            .iter()
            .all(|l| l.weights.iter().chain(l.bias.iter()).all(|v| v.is_finite()))
    }

    /// Checks that the layers chain: every bias matches its layer's width and every layer feeds
    /// the next one. Persisted parameters are checked this way before use.
    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(Error::InvalidDimension {
                row: 0,
                expected: 1,
                found: 0,
            });
        }

        for (i, layer) in self.layers.iter().enumerate() {
            if layer.bias.len() != layer.outputs() {
                return Err(Error::InvalidDimension {
                    row: i,
                    expected: layer.outputs(),
                    found: layer.bias.len(),
                });
            }
            if let Some(next) = self.layers.get(i + 1) {
                if next.inputs() != layer.outputs() {
                    return Err(Error::InvalidDimension {
                        row: i + 1,
                        expected: layer.outputs(),
                        found: next.inputs(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Input dimension `D`.
    pub fn input_dim(&self) -> usize {
        self.layers.first().map(Dense::inputs).unwrap_or(0)
    }

    /// Output dimension `E`.
    pub fn output_dim(&self) -> usize {
        self.layers.last().map(Dense::outputs).unwrap_or(0)
    }

    fn forward(&self, x: ArrayView2<'_, Scalar>) -> Array2<Scalar> {
        let mut h = x.to_owned();
        for layer in &self.layers {
            let act = layer.activation;
            h = layer.pre_activation(h.view()).mapv_into(|z| act.apply(z));
        }
        h
    }

    pub(crate) fn layers_mut(
        &mut self,
    ) -> impl Iterator<Item = (&mut Array2<Scalar>, &mut Array1<Scalar>)> + '_ {
        self.layers
            .iter_mut()
            .map(|l| (&mut l.weights, &mut l.bias))
    }
}

/// Intermediate values of a forward pass, consumed by [`Network::backward`].
#[derive(Debug)]
pub(crate) struct ForwardCache {
    inputs: Vec<Array2<Scalar>>,
    pre: Vec<Array2<Scalar>>,
}

/// Gradients of a scalar loss with respect to every parameter.
#[derive(Clone, Debug)]
pub(crate) struct Gradients {
    pub(crate) layers: Vec<(Array2<Scalar>, Array1<Scalar>)>,
}

impl Gradients {
    pub(crate) fn accumulate(&mut self, other: &Gradients) {
        for ((w, b), (ow, ob)) in self.layers.iter_mut().zip(&other.layers) {
            *w += ow;
            *b += ob;
        }
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.layers
            .iter()
            .all(|(w, b)| w.iter().chain(b.iter()).all(|v| v.is_finite()))
    }
}

/// The trainable embedding function `f: R^D → R^E`.
///
/// Only this type exposes parameter mutation; [`Network::freeze`] ends training.
#[derive(Clone, Debug)]
pub struct Network {
    params: Parameters,
}

impl Network {
    /// Randomly initialised network for `input_dim` inputs and `embedding_dims` outputs.
    pub fn init(
        architecture: &Architecture,
        input_dim: usize,
        embedding_dims: usize,
        seed: u64,
    ) -> Self {
        let mut rng = stream(seed, &[INIT]);
        let (hidden, activation) = architecture.hidden_layers();

        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut inputs = input_dim;
        for &width in hidden.iter().filter(|&&w| w > 0) {
            layers.push(Dense::init(inputs, width, activation, &mut rng));
            inputs = width;
        }
        layers.push(Dense::init(
            inputs,
            embedding_dims,
            Activation::Linear,
            &mut rng,
        ));

        Self {
            params: Parameters { layers },
        }
    }

    /// Wraps existing parameters.
    pub fn from_parameters(params: Parameters) -> Self {
        Self { params }
    }

    /// Current parameters.
    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    pub(crate) fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    /// Copy of the current parameters.
    pub fn snapshot(&self) -> Parameters {
        self.params.clone()
    }

    /// Replaces the current parameters with a snapshot.
    pub fn restore(&mut self, snapshot: Parameters) {
        self.params = snapshot;
    }

    /// Embeds a batch of points, one per row.
    pub fn forward(&self, x: ArrayView2<'_, Scalar>) -> Array2<Scalar> {
        self.params.forward(x)
    }

    pub(crate) fn forward_cached(&self, x: ArrayView2<'_, Scalar>) -> (Array2<Scalar>, ForwardCache) {
        let mut cache = ForwardCache {
            inputs: Vec::with_capacity(self.params.layers.len()),
            pre: Vec::with_capacity(self.params.layers.len()),
        };

        let mut h = x.to_owned();
        for layer in &self.params.layers {
            let z = layer.pre_activation(h.view());
            let act = layer.activation;
            let next = z.mapv(|v| act.apply(v));
            cache.inputs.push(h);
            cache.pre.push(z);
            h = next;
        }

        (h, cache)
    }

    /// Back-propagates `grad_out` (the loss gradient w.r.t. the outputs of `forward_cached`).
    pub(crate) fn backward(&self, cache: &ForwardCache, grad_out: Array2<Scalar>) -> Gradients {
        let n_layers = self.params.layers.len();
        let mut layers = Vec::with_capacity(n_layers);
        let mut grad = grad_out;

        for (l, layer) in self.params.layers.iter().enumerate().rev() {
            let act = layer.activation;
            Zip::from(&mut grad)
                .and(&cache.pre[l])
                .for_each(|g, &z| *g *= act.derivative(z));

            let grad_w = cache.inputs[l].t().dot(&grad);
            let grad_b = grad.sum_axis(Axis(0));
            if l > 0 {
                grad = grad.dot(&layer.weights.t());
            }
            layers.push((grad_w, grad_b));
        }

        layers.reverse();
        Gradients { layers }
    }

    /// Ends training and returns the read-only network.
    pub fn freeze(self) -> FrozenNetwork {
        FrozenNetwork {
            params: self.params,
        }
    }
}

/// A trained, immutable embedding function. Safe to share between threads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrozenNetwork {
    params: Parameters,
}

impl FrozenNetwork {
    /// Frozen parameters.
    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// Input dimension `D`.
    pub fn input_dim(&self) -> usize {
        self.params.input_dim()
    }

    /// Output dimension `E`.
    pub fn embedding_dims(&self) -> usize {
        self.params.output_dim()
    }

    /// Embeds every row of `points`. Row order is preserved and the output is a pure function of
    /// the input and the frozen parameters.
    pub fn transform(&self, points: ArrayView2<'_, Scalar>) -> Result<Array2<Scalar>> {
        check_queries(points, self.input_dim())?;

        if points.nrows() <= TRANSFORM_CHUNK {
            return Ok(self.params.forward(points));
        }

        let mut embedding = Array2::zeros((points.nrows(), self.embedding_dims()));
        embedding
            .axis_chunks_iter_mut(Axis(0), TRANSFORM_CHUNK)
            .into_par_iter()
            .zip(points.axis_chunks_iter(Axis(0), TRANSFORM_CHUNK))
            .for_each(|(mut out, chunk)| out.assign(&self.params.forward(chunk)));

        Ok(embedding)
    }

    /// Embeds a single point.
    pub fn embed_point(&self, point: ArrayView1<'_, Scalar>) -> Result<Array1<Scalar>> {
        let row = point.insert_axis(Axis(0));
        Ok(self.transform(row)?.row(0).to_owned())
    }

    /// Starts a new training session from these parameters.
    pub fn thaw(self) -> Network {
        Network {
            params: self.params,
        }
    }
}
