use ndarray::{Array1, Array2, Axis, concatenate, s};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::{
    binary_step::binary_step,
    cell::RecurrentCell,
    errors::{ActError, Result},
    halting::{HaltingActivation, HaltingUnit},
    state::CellState,
};

/// Values threaded from one outer step into the next.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ActCarry {
    /// `prob - 1` of the previous outer step.
    pub last_p: Array1<f32>,
    /// Accumulated output of the previous outer step, `(batch, output_size)`.
    pub last_output: Array2<f32>,
    /// Accumulated flattened state of the previous outer step, `(batch, num_units)`.
    pub last_state: Array2<f32>,
}

impl ActCarry {
    pub fn zeros(batch_size: usize, output_size: usize, state_size: usize) -> Self {
        Self {
            last_p: Array1::zeros(batch_size),
            last_output: Array2::zeros((batch_size, output_size)),
            last_state: Array2::zeros((batch_size, state_size)),
        }
    }
}

/// Per-call halting bookkeeping. Created fresh for every outer step.
#[derive(Clone, Debug)]
pub struct HaltingState {
    pub prob: Array1<f32>,
    pub prob_compare: Array1<f32>,
    pub active_mask: Array1<bool>,
    pub counter: Array1<f32>,
    pub acc_output: Array2<f32>,
    pub acc_state: Array2<f32>,
    pub acc_steps: Array1<f32>,
}

impl HaltingState {
    /// Seed the accumulators with the previous step's result, gated by
    /// `binary_step(last_p)`.
    pub fn new(carry: &ActCarry, carry_gate: &Array1<f32>) -> Self {
        let batch_size = carry.last_p.len();
        let gate = carry_gate.view().insert_axis(Axis(1));
        Self {
            prob: Array1::zeros(batch_size),
            prob_compare: Array1::zeros(batch_size),
            active_mask: Array1::from_elem(batch_size, true),
            counter: Array1::zeros(batch_size),
            acc_output: &carry.last_output * &gate,
            acc_state: &carry.last_state * &gate,
            acc_steps: Array1::zeros(batch_size),
        }
    }

    /// Halting predicate: keep iterating while any example is below threshold.
    pub fn any_below_threshold(&self) -> bool {
        self.prob_compare.iter().any(|&p| p < 1.0)
    }

    /// True before any example has consumed probability mass.
    pub fn is_fresh(&self) -> bool {
        self.prob.iter().all(|&p| p == 0.0)
    }

    pub fn float_mask(&self) -> Array1<f32> {
        self.active_mask.mapv(|a| if a { 1.0 } else { 0.0 })
    }

    /// Iterations actually executed per example.
    ///
    /// `counter` only counts iterations after which an example kept going, so
    /// an example that halted adds its halting iteration on top.
    pub fn total_steps(&self) -> Array1<f32> {
        let halted = self.active_mask.mapv(|a| if a { 0.0 } else { 1.0 });
        &self.counter + &halted
    }
}

/// Everything cached about one pondering iteration.
#[derive(Clone, Debug)]
pub struct PonderIteration {
    pub binary_flag: f32,
    pub p: Array1<f32>,
    pub halting: HaltingActivation,
    pub halting_source: Array2<f32>,
    /// Gate in effect during this iteration (the pre-iteration active mask).
    pub active_mask: Array1<f32>,
    pub prob: Array1<f32>,
    pub prob_compare: Array1<f32>,
    /// `binary_step(prob)` after this iteration's update.
    pub stepped_prob: Array1<f32>,
    pub output: Array2<f32>,
    /// Flattened new state.
    pub state: Array2<f32>,
}

/// Result of running the loop for one outer step.
#[derive(Clone, Debug)]
pub struct PonderOutcome {
    pub output: Array2<f32>,
    /// Flattened accumulated state.
    pub state: Array2<f32>,
    pub prob: Array1<f32>,
    pub counter: Array1<f32>,
    pub total_steps: Array1<f32>,
    pub acc_steps: Array1<f32>,
    /// `binary_step(last_p)`: weight of the carried result in the accumulators.
    pub carry_gate: Array1<f32>,
    /// `binary_step(1 - last_p)`: weight of this step's iterations.
    pub update_gate: Array1<f32>,
    pub iterations: Vec<PonderIteration>,
    /// The loop hit `max_computation` before every example halted.
    pub truncated: bool,
}

impl PonderOutcome {
    pub fn num_iterations(&self) -> usize {
        self.iterations.len()
    }

    pub fn mean_steps(&self) -> f32 {
        self.total_steps.mean().unwrap_or(0.0)
    }
}

/// Static settings the loop needs from the controller.
#[derive(Clone, Copy, Debug)]
pub struct PonderSettings {
    pub epsilon: f32,
    pub paired: bool,
    pub output_size: usize,
    pub max_computation: usize,
}

/// Run the wrapped cell until every example in the batch has halted.
///
/// All examples advance in lock-step; halted examples stay in the batch and
/// are masked out of the probability and accumulator updates.
pub fn ponder<C: RecurrentCell + ?Sized>(
    cell: &mut C,
    halting_unit: &HaltingUnit,
    input: &Array2<f32>,
    initial_state: Array2<f32>,
    carry: &ActCarry,
    settings: PonderSettings,
) -> Result<PonderOutcome> {
    let batch_size = carry.last_p.len();
    let state_width = initial_state.ncols();
    let epsilon = settings.epsilon;

    let carry_gate = binary_step(&carry.last_p, epsilon);
    let update_gate = binary_step(&carry.last_p.mapv(|p| 1.0 - p), epsilon);
    let update_gate_col = update_gate.view().insert_axis(Axis(1)).to_owned();

    let mut halt = HaltingState::new(carry, &carry_gate);
    let mut state = initial_state;
    let mut iterations: Vec<PonderIteration> = Vec::new();
    let mut truncated = false;

    while halt.any_below_threshold() {
        if iterations.len() >= settings.max_computation {
            truncated = true;
            let still_active = halt.active_mask.iter().filter(|&&a| a).count();
            warn!(
                max_computation = settings.max_computation,
                still_active = still_active,
                "Pondering hit the iteration ceiling before every example halted"
            );
            break;
        }

        let binary_flag = if halt.is_fresh() { 1.0 } else { 0.0 };
        let flags = Array2::from_elem((batch_size, 1), binary_flag);
        let augmented = concatenate(Axis(1), &[flags.view(), input.view()]).map_err(|e| {
            ActError::InvalidInput {
                message: format!("cannot prepend halting flag to input: {}", e),
            }
        })?;

        let cell_state = CellState::from_flat(state, settings.paired)?;
        let (output, new_cell_state) = cell.step(&augmented, &cell_state)?;
        validate_cell_step(&output, &new_cell_state, batch_size, state_width, &settings)?;

        let halting_source = new_cell_state.halting_source().clone();
        let activation = halting_unit.forward(&halting_source)?;
        let p = activation.p.clone();
        let new_state = new_cell_state.to_flat()?;

        let new_active_mask: Array1<bool> = ndarray::Zip::from(&halt.prob)
            .and(&p)
            .map_collect(|&prob, &p| prob + p < 1.0);
        let float_mask = halt.float_mask();

        halt.prob = &halt.prob + &(&p * &float_mask);
        halt.prob_compare = &halt.prob_compare + &(&p * &float_mask);
        halt.counter = &halt.counter + &new_active_mask.mapv(|a| if a { 1.0f32 } else { 0.0 });

        let stepped_prob = binary_step(&halt.prob, epsilon);
        let weight = (&stepped_prob * &float_mask).insert_axis(Axis(1));
        let gated = &update_gate_col * &weight;

        halt.acc_output = &halt.acc_output + &(&output * &gated);
        halt.acc_state = &halt.acc_state + &(&new_state * &gated);
        halt.acc_steps = &halt.acc_steps + &(stepped_prob.mapv(|b| 1.0 - b) * &float_mask);

        trace!(
            iteration = iterations.len(),
            binary_flag = binary_flag,
            active = float_mask.sum(),
            min_prob = halt.prob_compare.iter().cloned().fold(f32::INFINITY, f32::min),
            "Pondering iteration"
        );

        iterations.push(PonderIteration {
            binary_flag,
            p,
            halting: activation,
            halting_source,
            active_mask: float_mask,
            prob: halt.prob.clone(),
            prob_compare: halt.prob_compare.clone(),
            stepped_prob,
            output,
            state: new_state.clone(),
        });

        halt.active_mask = new_active_mask;
        state = new_state;
    }

    let total_steps = halt.total_steps();
    Ok(PonderOutcome {
        output: halt.acc_output,
        state: halt.acc_state,
        prob: halt.prob,
        counter: halt.counter,
        total_steps,
        acc_steps: halt.acc_steps,
        carry_gate,
        update_gate,
        iterations,
        truncated,
    })
}

fn validate_cell_step(
    output: &Array2<f32>,
    new_state: &CellState,
    batch_size: usize,
    state_width: usize,
    settings: &PonderSettings,
) -> Result<()> {
    if output.dim() != (batch_size, settings.output_size) {
        return Err(ActError::shape(
            "cell output",
            &[batch_size, settings.output_size],
            &[output.nrows(), output.ncols()],
        ));
    }
    if new_state.is_paired() != settings.paired {
        return Err(ActError::InvalidInput {
            message: format!(
                "cell returned a {} state, expected {}",
                if new_state.is_paired() { "paired" } else { "flat" },
                if settings.paired { "paired" } else { "flat" }
            ),
        });
    }
    if new_state.batch_size() != batch_size || new_state.width() != state_width {
        return Err(ActError::shape(
            "cell new state",
            &[batch_size, state_width],
            &[new_state.batch_size(), new_state.width()],
        ));
    }
    Ok(())
}

/// Gradients for one pondering iteration, to be pushed through the wrapped
/// cell's own backward pass.
#[derive(Clone, Debug)]
pub struct IterationGradients {
    pub output: Array2<f32>,
    /// Gradient with respect to the flattened new state, including the
    /// halting unit's read of it.
    pub state: Array2<f32>,
}

impl IterationGradients {
    /// State gradient in the cell's own layout.
    pub fn state_as_cell_state(&self, paired: bool) -> Result<CellState> {
        CellState::from_flat(self.state.clone(), paired)
    }
}

/// Backward result for one outer step.
#[derive(Clone, Debug)]
pub struct PonderGradients {
    pub iterations: Vec<IterationGradients>,
    pub halting_weights: Array2<f32>,
    pub halting_bias: f32,
    /// Gradient reaching the previous outer step's accumulated output.
    pub last_output: Array2<f32>,
    /// Gradient reaching the previous outer step's accumulated state.
    pub last_state: Array2<f32>,
}

/// Backward pass through the accumulation algebra of one outer step.
///
/// Every `binary_step` factor uses the straight-through rule. The carry gates
/// depend on the previous step's `prob` and are held constant here.
/// `grad_steps` is the gradient of the loss with respect to the batch mean of
/// `acc_steps`.
pub fn ponder_backward(
    outcome: &PonderOutcome,
    halting_unit: &HaltingUnit,
    grad_output: &Array2<f32>,
    grad_state: &Array2<f32>,
    grad_steps: f32,
    paired: bool,
) -> Result<PonderGradients> {
    if grad_output.dim() != outcome.output.dim() {
        return Err(ActError::shape(
            "output gradient",
            &[outcome.output.nrows(), outcome.output.ncols()],
            &[grad_output.nrows(), grad_output.ncols()],
        ));
    }
    if grad_state.dim() != outcome.state.dim() {
        return Err(ActError::shape(
            "state gradient",
            &[outcome.state.nrows(), outcome.state.ncols()],
            &[grad_state.nrows(), grad_state.ncols()],
        ));
    }

    let batch_size = outcome.prob.len();
    let steps_grad_per_example = if batch_size > 0 { grad_steps / batch_size as f32 } else { 0.0 };

    // Direct gradient of the loss with respect to each iteration's prob.
    let mut direct_prob_grads = Vec::with_capacity(outcome.iterations.len());
    let mut iteration_grads = Vec::with_capacity(outcome.iterations.len());

    for it in &outcome.iterations {
        let gate = &outcome.update_gate * &it.active_mask;
        let weight_col = (&gate * &it.stepped_prob).insert_axis(Axis(1));

        let output_grad = grad_output * &weight_col;
        let state_grad = grad_state * &weight_col;

        // d binary_step(prob) / d prob is taken as 1.
        let from_output = (grad_output * &it.output).sum_axis(Axis(1));
        let from_state = (grad_state * &it.state).sum_axis(Axis(1));
        let direct = &gate * &(&from_output + &from_state) - &(&it.active_mask * steps_grad_per_example);

        direct_prob_grads.push(direct);
        iteration_grads.push(IterationGradients {
            output: output_grad,
            state: state_grad,
        });
    }

    let mut halting_weights: Array2<f32> = Array2::zeros(halting_unit.weights().dim());
    let mut halting_bias = 0.0f32;
    let mut running: Array1<f32> = Array1::zeros(batch_size);

    for (t, it) in outcome.iterations.iter().enumerate().rev() {
        running = &running + &direct_prob_grads[t];
        let grad_p = &it.active_mask * &running;

        let (grad_source, grad_w, grad_b) = halting_unit.compute_gradients(&it.halting_source, &it.halting, &grad_p);
        halting_weights = halting_weights + &grad_w;
        halting_bias += grad_b;

        let width = grad_source.ncols();
        let mut halting_slice = if paired {
            iteration_grads[t].state.slice_mut(s![.., ..width])
        } else {
            iteration_grads[t].state.view_mut()
        };
        halting_slice += &grad_source;
    }

    let carry_gate_col = outcome.carry_gate.view().insert_axis(Axis(1));
    Ok(PonderGradients {
        iterations: iteration_grads,
        halting_weights,
        halting_bias,
        last_output: grad_output * &carry_gate_col,
        last_state: grad_state * &carry_gate_col,
    })
}
