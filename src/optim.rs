use ndarray::{Array1, Array2, Zip};

use crate::network::{Gradients, Parameters};
use crate::Scalar;

/// Adam optimiser state, one pair of moment estimates per parameter tensor.
///
/// ```text
/// m = β1·m + (1 − β1)·g
/// v = β2·v + (1 − β2)·g²
/// θ = θ − lr · m̂ / (√v̂ + ε)
/// ```
#[derive(Clone, Debug)]
pub struct Adam {
    learning_rate: Scalar,
    beta1: Scalar,
    beta2: Scalar,
    epsilon: Scalar,
    step: i32,
    moments: Vec<Moments>,
}

#[derive(Clone, Debug)]
struct Moments {
    m_w: Array2<Scalar>,
    v_w: Array2<Scalar>,
    m_b: Array1<Scalar>,
    v_b: Array1<Scalar>,
}

impl Adam {
    /// Creates zeroed moments shaped like `params`.
    pub fn new(learning_rate: Scalar, params: &Parameters) -> Self {
        let moments = params
            .layers()
            .iter()
            .map(|layer| Moments {
                m_w: Array2::zeros((layer.inputs(), layer.outputs())),
                v_w: Array2::zeros((layer.inputs(), layer.outputs())),
                m_b: Array1::zeros(layer.outputs()),
                v_b: Array1::zeros(layer.outputs()),
            })
            .collect();

        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
            moments,
        }
    }

    pub(crate) fn step(&mut self, params: &mut Parameters, grads: &Gradients) {
        self.step = self.step.saturating_add(1);

        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);
        let lr_t = self.learning_rate * (1. - b2.powi(self.step)).sqrt() / (1. - b1.powi(self.step));

        let update = move |theta: &mut Scalar, m: &mut Scalar, v: &mut Scalar, g: &Scalar| {
            *m = b1 * *m + (1. - b1) * g;
            *v = b2 * *v + (1. - b2) * g * g;
            *theta -= lr_t * *m / (v.sqrt() + eps);
        };

        for (((w, b), moments), (g_w, g_b)) in params
            .layers_mut()
            .zip(self.moments.iter_mut())
            .zip(&grads.layers)
        {
            Zip::from(w)
                .and(&mut moments.m_w)
                .and(&mut moments.v_w)
                .and(g_w)
                .for_each(update);
            Zip::from(b)
                .and(&mut moments.m_b)
                .and(&mut moments.v_b)
                .and(g_b)
                .for_each(update);
        }
    }
}
