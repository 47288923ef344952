use serde::{Deserialize, Serialize};

/// Append-only log of batch-mean pondering iterations, one entry per outer step.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PonderCost {
    steps: Vec<f32>,
}

impl PonderCost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, mean_steps: f32) {
        self.steps.push(mean_steps);
    }

    pub fn entries(&self) -> &[f32] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Mean of the recorded entries; 0.0 before anything was recorded.
    pub fn cost(&self) -> f32 {
        if self.steps.is_empty() {
            return 0.0;
        }
        self.steps.iter().sum::<f32>() / self.steps.len() as f32
    }

    /// Gradient of `weight * cost()` with respect to a single step's entry.
    pub fn step_gradient(&self, weight: f32) -> f32 {
        if self.steps.is_empty() {
            0.0
        } else {
            weight / self.steps.len() as f32
        }
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }
}
