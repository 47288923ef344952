use ndarray::Array2;
use tracing::{debug, instrument};

use crate::{
    cell::RecurrentCell,
    config::ActConfig,
    errors::{ActError, Result},
    halting::HaltingUnit,
    ponder::PonderCost,
    pondering::{ActCarry, PonderGradients, PonderOutcome, PonderSettings, ponder, ponder_backward},
    state::CellState,
};

/// Adaptive Computation Time wrapper around a recurrent cell.
///
/// Each call to [`ActCell::step`] runs the wrapped cell a data-dependent number
/// of times, accumulating outputs and states weighted by the halting gates, and
/// returns the accumulated result as the step output and new outer state.
///
/// # Carry state
///
/// Between outer steps the cell keeps:
/// - `last_p`: the previous step's cumulative probability minus one
/// - `last_output` / `last_state`: the previous step's accumulated result
///
/// When the previous step overshot the threshold by at least one half
/// (`binary_step(last_p) == 1`) its result seeds the new accumulators; when it
/// overshot by more than one half (`binary_step(1 - last_p) == 0`) the new
/// iterations do not contribute, and the step repeats the previous result.
///
/// Outer steps are strictly sequential. Call [`ActCell::reset`] (or
/// [`ActCell::finalize`]) between independent sequences.
///
/// # Reference
///
/// Graves, "Adaptive Computation Time for Recurrent Neural Networks",
/// arXiv:1603.08983, 2016
pub struct ActCell<C: RecurrentCell> {
    cell: C,
    config: ActConfig,
    halting_unit: HaltingUnit,
    carry: ActCarry,
    ponder_cost: PonderCost,

    /// Most recent step, kept for the backward pass
    last_outcome: Option<PonderOutcome>,
}

impl<C: RecurrentCell> ActCell<C> {
    /// Wrap `cell` with a freshly initialised halting unit.
    pub fn new(cell: C, config: ActConfig) -> Result<Self> {
        config.validate()?;
        let halting_unit = HaltingUnit::new(
            config.halting_input_size(),
            config.initial_bias,
            config.halting_scale(),
        );
        Self::with_halting_unit(cell, config, halting_unit)
    }

    /// Wrap `cell` with an explicit halting unit (restored or hand-built).
    pub fn with_halting_unit(cell: C, config: ActConfig, halting_unit: HaltingUnit) -> Result<Self> {
        config.validate()?;
        if halting_unit.input_dim() != config.halting_input_size() {
            return Err(ActError::shape(
                "halting unit weights",
                &[config.halting_input_size(), 1],
                &[halting_unit.input_dim(), 1],
            ));
        }

        let carry = ActCarry::zeros(config.batch_size, config.output_size(), config.state_size());
        Ok(Self {
            cell,
            config,
            halting_unit,
            carry,
            ponder_cost: PonderCost::new(),
            last_outcome: None,
        })
    }

    pub fn config(&self) -> &ActConfig {
        &self.config
    }

    pub fn cell(&self) -> &C {
        &self.cell
    }

    pub fn cell_mut(&mut self) -> &mut C {
        &mut self.cell
    }

    pub fn into_cell(self) -> C {
        self.cell
    }

    pub fn halting_unit(&self) -> &HaltingUnit {
        &self.halting_unit
    }

    pub fn carry(&self) -> &ActCarry {
        &self.carry
    }

    pub fn ponder_log(&self) -> &PonderCost {
        &self.ponder_cost
    }

    pub fn last_outcome(&self) -> Option<&PonderOutcome> {
        self.last_outcome.as_ref()
    }

    pub fn input_size(&self) -> usize {
        self.config.num_units
    }

    pub fn output_size(&self) -> usize {
        self.config.output_size()
    }

    pub fn state_size(&self) -> usize {
        self.config.state_size()
    }

    /// Trainable parameters owned by ACT itself (the halting unit).
    pub fn parameters(&self) -> usize {
        self.halting_unit.parameters()
    }

    /// Zero state in the layout the wrapped cell expects.
    pub fn zero_state(&self) -> CellState {
        CellState::zeros(self.config.batch_size, self.config.num_units, self.config.state_is_tuple)
    }

    /// Run one outer time step.
    ///
    /// `timestep` only labels log events.
    #[instrument(level = "debug", skip(self, input, state))]
    pub fn step(&mut self, input: &Array2<f32>, state: &CellState, timestep: usize) -> Result<(Array2<f32>, CellState)> {
        self.validate_step_inputs(input, state)?;

        let settings = PonderSettings {
            epsilon: self.config.epsilon,
            paired: self.config.state_is_tuple,
            output_size: self.config.output_size(),
            max_computation: self.config.max_computation,
        };

        let outcome = ponder(
            &mut self.cell,
            &self.halting_unit,
            input,
            state.to_flat()?,
            &self.carry,
            settings,
        )?;

        let mean_steps = outcome.mean_steps();
        self.ponder_cost.record(mean_steps);

        debug!(
            timestep = timestep,
            iterations = outcome.num_iterations(),
            mean_steps = mean_steps,
            truncated = outcome.truncated,
            "ACT step complete"
        );

        self.carry = ActCarry {
            last_p: outcome.prob.mapv(|p| p - 1.0),
            last_output: outcome.output.clone(),
            last_state: outcome.state.clone(),
        };

        let output = outcome.output.clone();
        let new_state = CellState::from_flat(outcome.state.clone(), self.config.state_is_tuple)?;
        self.last_outcome = Some(outcome);

        Ok((output, new_state))
    }

    /// Mean pondering iterations per outer step recorded so far.
    pub fn ponder_cost(&self) -> f32 {
        self.ponder_cost.cost()
    }

    /// `ponder_weight * ponder_cost()`, ready to add to the training objective.
    pub fn weighted_ponder_cost(&self) -> f32 {
        self.config.ponder_weight * self.ponder_cost.cost()
    }

    /// Gradient of the weighted ponder cost with respect to one step's entry.
    ///
    /// Pass this as `grad_steps` to [`ActCell::compute_gradients`].
    pub fn ponder_step_gradient(&self) -> f32 {
        self.ponder_cost.step_gradient(self.config.ponder_weight)
    }

    /// Start a new sequence: zero the carry and clear the ponder log.
    pub fn reset(&mut self) {
        self.carry = ActCarry::zeros(self.config.batch_size, self.config.output_size(), self.config.state_size());
        self.ponder_cost.clear();
        self.last_outcome = None;
    }

    /// Return the sequence's ponder cost and reset for the next sequence.
    pub fn finalize(&mut self) -> f32 {
        let cost = self.ponder_cost();
        self.reset();
        cost
    }

    /// Backward pass for the most recent [`ActCell::step`].
    ///
    /// `grad_state` may be given in either state layout. The result carries one
    /// entry per pondering iteration, in forward order, for the caller to push
    /// through the wrapped cell.
    pub fn compute_gradients(
        &self,
        grad_output: &Array2<f32>,
        grad_state: &CellState,
        grad_steps: f32,
    ) -> Result<PonderGradients> {
        let outcome = self.last_outcome.as_ref().ok_or_else(|| ActError::GradientError {
            message: "step must be run before computing gradients".to_string(),
        })?;

        ponder_backward(
            outcome,
            &self.halting_unit,
            grad_output,
            &grad_state.to_flat()?,
            grad_steps,
            self.config.state_is_tuple,
        )
    }

    /// Update the halting unit from gradients produced by [`ActCell::compute_gradients`].
    pub fn apply_gradients(&mut self, grads: &PonderGradients, lr: f32) -> Result<()> {
        self.halting_unit
            .apply_gradients(&grads.halting_weights, grads.halting_bias, lr)
    }

    fn validate_step_inputs(&self, input: &Array2<f32>, state: &CellState) -> Result<()> {
        let batch_size = self.config.batch_size;

        if input.nrows() != batch_size {
            return Err(ActError::shape(
                "step input",
                &[batch_size, input.ncols()],
                &[input.nrows(), input.ncols()],
            ));
        }
        if state.is_paired() != self.config.state_is_tuple {
            return Err(ActError::InvalidInput {
                message: format!(
                    "expected a {} state for this cell",
                    if self.config.state_is_tuple { "paired" } else { "flat" }
                ),
            });
        }
        if state.batch_size() != batch_size || state.width() != self.config.num_units {
            return Err(ActError::shape(
                "outer state",
                &[batch_size, self.config.num_units],
                &[state.batch_size(), state.width()],
            ));
        }
        Ok(())
    }
}
