use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Adam optimizer state for one parameter matrix.
///
/// The halting unit keeps one instance per parameter (weights and bias), so
/// the moment estimates always match the parameter shape.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Adam {
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    timestep: usize,
    pub m: Array2<f32>,
    pub v: Array2<f32>,
}

impl Adam {
    pub fn new(shape: (usize, usize)) -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            timestep: 0,
            m: Array2::zeros(shape),
            v: Array2::zeros(shape),
        }
    }

    pub fn timestep(&self) -> usize {
        self.timestep
    }

    /// Drop the moment estimates (e.g. after loading parameters from a checkpoint).
    pub fn reset(&mut self) {
        self.timestep = 0;
        self.m.fill(0.0);
        self.v.fill(0.0);
    }

    #[inline]
    pub fn step(&mut self, params: &mut Array2<f32>, grads: &Array2<f32>, lr: f32) {
        self.timestep += 1;

        self.m = &self.m * self.beta1 + &(grads * (1.0 - self.beta1));
        self.v = &self.v * self.beta2 + &(grads.mapv(|g| g * g) * (1.0 - self.beta2));

        let m_correction = 1.0 - self.beta1.powi(self.timestep as i32);
        let v_correction = 1.0 - self.beta2.powi(self.timestep as i32);

        let epsilon = self.epsilon;
        let mut update = &self.m / m_correction;
        update.zip_mut_with(&self.v, |u, &v| {
            *u /= (v / v_correction).sqrt() + epsilon;
        });
        *params -= &(update * lr);
    }
}
