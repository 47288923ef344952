use ndarray::{Array, ArrayBase, Data, Dimension};
use serde::{Deserialize, Serialize};

/// Round a value in [0, 1] to {0, 1}.
///
/// Returns 1 exactly when `x >= 0.5 - epsilon`, otherwise 0. Values outside
/// [0, 1] saturate, so a cumulative probability of 1.2 maps to 1 and a
/// negative remainder maps to 0.
#[inline]
pub fn binary_step_scalar(x: f32, epsilon: f32) -> f32 {
    if x >= 0.5 - epsilon { 1.0 } else { 0.0 }
}

/// Elementwise hard rounding with a straight-through gradient.
///
/// The forward value is the rounding result; the matching backward rule is
/// [`binary_step_backward`], which passes the upstream gradient through
/// unchanged instead of the true (everywhere-zero) derivative.
pub fn binary_step<S, D>(x: &ArrayBase<S, D>, epsilon: f32) -> Array<f32, D>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    x.mapv(|v| binary_step_scalar(v, epsilon))
}

/// Straight-through estimator: d binary_step(x) / dx is treated as 1.
pub fn binary_step_backward<S, D>(grads: &ArrayBase<S, D>) -> Array<f32, D>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    grads.to_owned()
}

/// Binary step operator carrying its rounding offset.
///
/// Used wherever a discrete 0/1 gate has to stay on the gradient path.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct BinaryStep {
    pub epsilon: f32,
}

impl BinaryStep {
    pub fn new(epsilon: f32) -> Self {
        Self { epsilon }
    }

    pub fn forward<S, D>(&self, x: &ArrayBase<S, D>) -> Array<f32, D>
    where
        S: Data<Elem = f32>,
        D: Dimension,
    {
        binary_step(x, self.epsilon)
    }

    pub fn backward<S, D>(&self, grads: &ArrayBase<S, D>) -> Array<f32, D>
    where
        S: Data<Elem = f32>,
        D: Dimension,
    {
        binary_step_backward(grads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2, array};

    #[test]
    fn test_binary_step_threshold() {
        let x = array![0.0f32, 0.2, 0.49, 0.5, 0.51, 0.9, 1.0];
        let y = binary_step(&x, 0.0);
        assert_eq!(y, array![0.0f32, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_binary_step_epsilon_shifts_threshold() {
        let x = array![0.35f32, 0.39, 0.41];
        let y = binary_step(&x, 0.1);
        assert_eq!(y, array![0.0f32, 0.0, 1.0]);
    }

    #[test]
    fn test_binary_step_saturates_outside_unit_interval() {
        let x = array![-0.7f32, -0.2, 1.2, 1.7];
        let y = binary_step(&x, 0.0);
        assert_eq!(y, array![0.0f32, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_backward_is_identity() {
        let op = BinaryStep::new(0.0);
        let grads = Array2::from_shape_vec((2, 3), vec![0.3, -1.0, 2.5, 0.0, 7.0, -0.01]).unwrap();
        assert_eq!(op.backward(&grads), grads);

        let flat: Array1<f32> = array![1.5, -2.0];
        assert_eq!(binary_step_backward(&flat), flat);
    }
}
