//! Triplet-ranking losses over embedded `(anchor, positive, negative)` batches.
//!
//! Every loss is computed on Euclidean distances in the embedding space and returns its analytic
//! gradient with respect to the three embedding matrices, so the trainer can back-propagate each
//! role through the same network.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::Scalar;

/// Squared distances below this are treated as zero; their gradient vanishes.
const EPSILON: Scalar = 1e-7;

/// Formulation of the triplet-ranking loss.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Loss {
    /// `max(0, d(a,p) - min(d(a,n), d(p,n)) + margin)`.
    PnMargin,
    /// `max(0, d(a,p) - d(a,n) + margin)`.
    Margin,
    /// Softmax ratio of `d(a,p)` against `d(a,n)`.
    SoftmaxRatio,
    /// Softmax ratio of `d(a,p)` against `min(d(a,n), d(p,n))`.
    SoftmaxRatioPn,
}

impl Default for Loss {
    fn default() -> Self {
        Loss::PnMargin
    }
}

/// Mean loss over a batch and its gradients.
#[derive(Clone, Debug)]
pub struct LossOutput {
    /// Mean loss of the batch.
    pub value: Scalar,
    /// Gradient with respect to the anchor embeddings.
    pub anchor: Array2<Scalar>,
    /// Gradient with respect to the positive embeddings.
    pub positive: Array2<Scalar>,
    /// Gradient with respect to the negative embeddings.
    pub negative: Array2<Scalar>,
}

struct Distance {
    value: Scalar,
    /// `(u - v) / d`, zero when `d` is clamped.
    direction: Array1<Scalar>,
}

fn distance(u: ArrayView1<'_, Scalar>, v: ArrayView1<'_, Scalar>) -> Distance {
    let diff = &u - &v;
    let squared = diff.dot(&diff);
    if squared.is_nan() {
        Distance {
            value: Scalar::NAN,
            direction: Array1::zeros(diff.len()),
        }
    } else if squared > EPSILON {
        let value = squared.sqrt();
        Distance {
            value,
            direction: diff / value,
        }
    } else {
        Distance {
            value: EPSILON.sqrt(),
            direction: Array1::zeros(diff.len()),
        }
    }
}

#[inline]
fn sigmoid(x: Scalar) -> Scalar {
    if x >= 0. {
        1. / (1. + (-x).exp())
    } else {
        let e = x.exp();
        e / (1. + e)
    }
}

impl Loss {
    /// Evaluates the mean loss over the rows of three equally shaped embedding matrices.
    pub fn evaluate(
        &self,
        anchor: ArrayView2<'_, Scalar>,
        positive: ArrayView2<'_, Scalar>,
        negative: ArrayView2<'_, Scalar>,
        margin: Scalar,
    ) -> LossOutput {
        let (rows, dims) = anchor.dim();
        let mut out = LossOutput {
            value: 0.,
            anchor: Array2::zeros((rows, dims)),
            positive: Array2::zeros((rows, dims)),
            negative: Array2::zeros((rows, dims)),
        };

        if rows == 0 {
            return out;
        }

        let scale = 1. / rows as Scalar;
        let mut total = 0.;

        for i in 0..rows {
            let ap = distance(anchor.row(i), positive.row(i));
            let an = distance(anchor.row(i), negative.row(i));
            let pn = distance(positive.row(i), negative.row(i));

            let use_pn = matches!(self, Loss::PnMargin | Loss::SoftmaxRatioPn) && pn.value < an.value;
            let neg = if use_pn { pn.value } else { an.value };

            // dL/dd(a,p) and dL/dd(negative distance).
            let (value, g_pos, g_neg) = match self {
                Loss::PnMargin | Loss::Margin => {
                    let hinge = ap.value - neg + margin;
                    if hinge > 0. {
                        (hinge, 1., -1.)
                    } else if hinge.is_nan() {
                        (Scalar::NAN, 0., 0.)
                    } else {
                        (0., 0., 0.)
                    }
                }
                Loss::SoftmaxRatio | Loss::SoftmaxRatioPn => {
                    let s = sigmoid(ap.value - neg);
                    let ds = 4. * s * s * (1. - s);
                    (2. * s * s, ds, -ds)
                }
            };

            total += value;
            if g_pos == 0. && g_neg == 0. {
                continue;
            }

            let g_pos = g_pos * scale;
            let g_neg = g_neg * scale;

            let mut ga = out.anchor.row_mut(i);
            ga.scaled_add(g_pos, &ap.direction);
            let mut gp = out.positive.row_mut(i);
            gp.scaled_add(-g_pos, &ap.direction);

            if use_pn {
                gp.scaled_add(g_neg, &pn.direction);
                out.negative.row_mut(i).scaled_add(-g_neg, &pn.direction);
            } else {
                out.anchor.row_mut(i).scaled_add(g_neg, &an.direction);
                out.negative.row_mut(i).scaled_add(-g_neg, &an.direction);
            }
        }

        out.value = total * scale;
        out
    }
}
