use std::fs;

use serde::{Deserialize, Serialize};

use crate::errors::{ActError, Result};

/// Configuration for an [`crate::act::ActCell`].
///
/// # Example
/// ```rust
/// use act_cell::ActConfig;
///
/// let config = ActConfig::new(32, 16)
///     .with_mu(1.0)
///     .with_max_computation(20);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActConfig {
    /// Width of the wrapped cell's (flattened) state.
    ///
    /// For paired states each half is `num_units / 2` wide and the cell
    /// output is `num_units / 2` wide as well.
    pub num_units: usize,

    /// Number of examples processed in lock-step.
    pub batch_size: usize,

    /// Rounding offset of the binary step: a value rounds up when
    /// `x >= 0.5 - epsilon`.
    #[serde(default)]
    pub epsilon: f32,

    /// Output scale of the halting sigmoid for flat-state cells.
    #[serde(default = "default_mu")]
    pub mu: f32,

    /// Hard ceiling on pondering iterations per outer step.
    #[serde(default = "default_max_computation")]
    pub max_computation: usize,

    /// Pre-sigmoid bias the halting unit starts from.
    ///
    /// Negative values start training with cells that ponder longer.
    #[serde(default = "default_initial_bias")]
    pub initial_bias: f32,

    /// Wrapped cell keeps a memory/output pair instead of one tensor.
    #[serde(default)]
    pub state_is_tuple: bool,

    /// Weight the caller applies to the ponder cost in its objective.
    #[serde(default = "default_ponder_weight")]
    pub ponder_weight: f32,
}

fn default_mu() -> f32 {
    5.0
}

fn default_max_computation() -> usize {
    100
}

fn default_initial_bias() -> f32 {
    -1.0
}

fn default_ponder_weight() -> f32 {
    0.001
}

impl ActConfig {
    pub fn new(num_units: usize, batch_size: usize) -> Self {
        Self {
            num_units,
            batch_size,
            epsilon: 0.0,
            mu: default_mu(),
            max_computation: default_max_computation(),
            initial_bias: default_initial_bias(),
            state_is_tuple: false,
            ponder_weight: default_ponder_weight(),
        }
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_mu(mut self, mu: f32) -> Self {
        self.mu = mu;
        self
    }

    pub fn with_max_computation(mut self, max_computation: usize) -> Self {
        self.max_computation = max_computation;
        self
    }

    pub fn with_initial_bias(mut self, initial_bias: f32) -> Self {
        self.initial_bias = initial_bias;
        self
    }

    pub fn with_state_is_tuple(mut self, state_is_tuple: bool) -> Self {
        self.state_is_tuple = state_is_tuple;
        self
    }

    pub fn with_ponder_weight(mut self, ponder_weight: f32) -> Self {
        self.ponder_weight = ponder_weight;
        self
    }

    pub fn output_size(&self) -> usize {
        if self.state_is_tuple { self.num_units / 2 } else { self.num_units }
    }

    pub fn state_size(&self) -> usize {
        self.num_units
    }

    /// Width of the tensor the halting unit reads.
    pub fn halting_input_size(&self) -> usize {
        if self.state_is_tuple { self.num_units / 2 } else { self.num_units }
    }

    /// Scale applied to the halting sigmoid. Paired-state cells are not scaled.
    pub fn halting_scale(&self) -> f32 {
        if self.state_is_tuple { 1.0 } else { self.mu }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(ActError::InvalidConfig { message });

        if self.num_units == 0 {
            return invalid("num_units must be positive".to_string());
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be positive".to_string());
        }
        if self.state_is_tuple && self.num_units % 2 != 0 {
            return invalid(format!(
                "num_units must be even for paired state, got {}",
                self.num_units
            ));
        }
        if !(self.mu.is_finite() && self.mu > 0.0) {
            return invalid(format!("mu must be positive and finite, got {}", self.mu));
        }
        if self.max_computation == 0 {
            return invalid("max_computation must be at least 1".to_string());
        }
        if !self.epsilon.is_finite() || !self.initial_bias.is_finite() {
            return invalid("epsilon and initial_bias must be finite".to_string());
        }
        if !(self.ponder_weight.is_finite() && self.ponder_weight >= 0.0) {
            return invalid(format!("ponder_weight must be non-negative, got {}", self.ponder_weight));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ActConfig = serde_json::from_str(json).map_err(|e| ActError::Serialization {
            source: Box::new(e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ActError::Serialization {
            source: Box::new(e),
        })
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(ActError::from)?;
        Self::from_json_str(&data)
    }
}
