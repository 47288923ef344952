use ndarray::{Array1, Array2, Axis};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::adam::Adam;
use crate::errors::{ActError, Result};

#[inline]
fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Per-example halting contribution computed during one pondering iteration.
#[derive(Clone, Debug)]
pub struct HaltingActivation {
    /// `scale * sigmoid(z)`, one entry per example.
    pub p: Array1<f32>,
    /// `sigmoid(z)`, kept for the backward pass.
    pub sigmoid: Array1<f32>,
}

/// Learned halting probability: `p = scale * sigmoid(x · w + b)`.
///
/// `x` is the cell's new state (or the memory half of a paired state). The
/// bias starts at the configured `initial_bias`, which decides whether a fresh
/// model halts after one iteration or ponders for several.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HaltingUnit {
    weights: Array2<f32>,
    bias: f32,
    scale: f32,

    optimizer_weights: Adam,
    optimizer_bias: Adam,
}

impl HaltingUnit {
    /// Glorot-normal weights, bias set to `initial_bias`.
    pub fn new(input_dim: usize, initial_bias: f32, scale: f32) -> Self {
        let mut rng = rand::rng();
        let std = (2.0 / (input_dim as f32 + 1.0)).sqrt();
        let normal = Normal::new(0.0, std).unwrap();

        Self {
            weights: Array2::from_shape_fn((input_dim, 1), |_| normal.sample(&mut rng)),
            bias: initial_bias,
            scale,
            optimizer_weights: Adam::new((input_dim, 1)),
            optimizer_bias: Adam::new((1, 1)),
        }
    }

    /// Build a unit with explicit parameters, e.g. restored from a checkpoint.
    pub fn from_parameters(weights: Array2<f32>, bias: f32, scale: f32) -> Result<Self> {
        if weights.ncols() != 1 {
            return Err(ActError::shape(
                "halting weights",
                &[weights.nrows(), 1],
                &[weights.nrows(), weights.ncols()],
            ));
        }
        let input_dim = weights.nrows();
        Ok(Self {
            weights,
            bias,
            scale,
            optimizer_weights: Adam::new((input_dim, 1)),
            optimizer_bias: Adam::new((1, 1)),
        })
    }

    pub fn input_dim(&self) -> usize {
        self.weights.nrows()
    }

    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    pub fn bias(&self) -> f32 {
        self.bias
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn parameters(&self) -> usize {
        self.weights.len() + 1
    }

    pub fn forward(&self, source: &Array2<f32>) -> Result<HaltingActivation> {
        if source.ncols() != self.input_dim() {
            return Err(ActError::shape(
                "halting unit input",
                &[source.nrows(), self.input_dim()],
                &[source.nrows(), source.ncols()],
            ));
        }

        let logits = source.dot(&self.weights).index_axis_move(Axis(1), 0) + self.bias;
        let sigmoid = logits.mapv(sigmoid);
        let p = &sigmoid * self.scale;

        Ok(HaltingActivation { p, sigmoid })
    }

    /// Backward pass for one iteration.
    ///
    /// Returns `(grad_source, grad_weights, grad_bias)` for upstream gradient
    /// `grad_p` with respect to `p`.
    pub fn compute_gradients(
        &self,
        source: &Array2<f32>,
        activation: &HaltingActivation,
        grad_p: &Array1<f32>,
    ) -> (Array2<f32>, Array2<f32>, f32) {
        // dp/dz = scale * s * (1 - s)
        let grad_logits = grad_p * &activation.sigmoid.mapv(|s| self.scale * s * (1.0 - s));
        let grad_logits_col = grad_logits.view().insert_axis(Axis(1));

        let grad_weights = source.t().dot(&grad_logits_col);
        let grad_bias = grad_logits.sum();
        let grad_source = grad_logits_col.dot(&self.weights.t());

        (grad_source, grad_weights, grad_bias)
    }

    pub fn apply_gradients(&mut self, grad_weights: &Array2<f32>, grad_bias: f32, lr: f32) -> Result<()> {
        if grad_weights.dim() != self.weights.dim() {
            return Err(ActError::GradientError {
                message: format!(
                    "HaltingUnit expected weight gradient of shape {:?}, got {:?}",
                    self.weights.dim(),
                    grad_weights.dim()
                ),
            });
        }

        self.optimizer_weights.step(&mut self.weights, grad_weights, lr);

        let mut bias = Array2::from_elem((1, 1), self.bias);
        let grad = Array2::from_elem((1, 1), grad_bias);
        self.optimizer_bias.step(&mut bias, &grad, lr);
        self.bias = bias[[0, 0]];

        Ok(())
    }
}
