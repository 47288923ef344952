#![allow(dead_code)]

use act_cell::{ActCell, ActConfig, ActError, CellState, HaltingUnit, RecurrentCell, Result};
use ndarray::{Array2, Axis};

/// Deterministic cell: every call adds a per-example increment to the state.
///
/// The increment is read from the first caller column (column 1, after the
/// halting flag) and defaults to 1.0 when the caller passes no columns.
/// Flat state: `s' = s + inc`, output `s'`.
/// Paired state: `c' = c + inc`, `h' = 2 c'`, output `h'`.
#[derive(Default)]
pub struct CountingCell {
    pub flags: Vec<f32>,
    pub calls: usize,
}

impl CountingCell {
    pub fn new() -> Self {
        Self::default()
    }

    fn increments(input: &Array2<f32>) -> Array2<f32> {
        let batch = input.nrows();
        if input.ncols() > 1 {
            input.column(1).to_owned().insert_axis(Axis(1))
        } else {
            Array2::ones((batch, 1))
        }
    }
}

impl RecurrentCell for CountingCell {
    fn cell_type(&self) -> &str {
        "CountingCell"
    }

    fn step(&mut self, input: &Array2<f32>, state: &CellState) -> Result<(Array2<f32>, CellState)> {
        self.calls += 1;
        self.flags.push(input[[0, 0]]);
        let inc = Self::increments(input);

        match state {
            CellState::Flat(s) => {
                let next = s + &inc;
                Ok((next.clone(), CellState::Flat(next)))
            }
            CellState::Paired(c, _) => {
                let next_c = c + &inc;
                let next_h = &next_c * 2.0;
                Ok((next_h.clone(), CellState::Paired(next_c, next_h)))
            }
        }
    }
}

/// Cell returning an output of the wrong width.
pub struct BrokenCell;

impl RecurrentCell for BrokenCell {
    fn step(&mut self, input: &Array2<f32>, state: &CellState) -> Result<(Array2<f32>, CellState)> {
        Ok((Array2::zeros((input.nrows(), 99)), state.clone()))
    }
}

/// Cell that refuses every call.
pub struct FailingCell;

impl RecurrentCell for FailingCell {
    fn step(&mut self, _input: &Array2<f32>, _state: &CellState) -> Result<(Array2<f32>, CellState)> {
        Err(ActError::InvalidInput {
            message: "failing cell".to_string(),
        })
    }
}

/// Pre-sigmoid bias for which `scale * sigmoid(bias) == p`.
pub fn bias_for(p: f32, scale: f32) -> f32 {
    let q = p / scale;
    (q / (1.0 - q)).ln()
}

/// Halting unit whose output ignores the state.
pub fn constant_halting(input_dim: usize, p: f32, scale: f32) -> HaltingUnit {
    HaltingUnit::from_parameters(Array2::zeros((input_dim, 1)), bias_for(p, scale), scale).unwrap()
}

/// Flat-state ACT cell with a constant halting probability `p` (mu = 1).
pub fn constant_act(batch_size: usize, num_units: usize, p: f32) -> ActCell<CountingCell> {
    let config = ActConfig::new(num_units, batch_size).with_mu(1.0);
    ActCell::with_halting_unit(CountingCell::new(), config, constant_halting(num_units, p, 1.0)).unwrap()
}

/// Flat-state ACT cell, one unit wide, halting `p = sigmoid(0.5 s - 1)`.
pub fn state_dependent_act(batch_size: usize) -> ActCell<CountingCell> {
    let config = ActConfig::new(1, batch_size).with_mu(1.0);
    let unit = HaltingUnit::from_parameters(Array2::from_elem((1, 1), 0.5), -1.0, 1.0).unwrap();
    ActCell::with_halting_unit(CountingCell::new(), config, unit).unwrap()
}

/// Column input carrying one increment per example.
pub fn increments(values: &[f32]) -> Array2<f32> {
    Array2::from_shape_vec((values.len(), 1), values.to_vec()).unwrap()
}
