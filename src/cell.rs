use ndarray::Array2;

use crate::{errors::Result, state::CellState};

/// A recurrent cell that ACT can ponder over.
///
/// The input handed to `step` is the caller's step input with one extra
/// leading column: a flag that is 1.0 on the first pondering iteration of an
/// outer step and 0.0 afterwards. Cells must therefore accept
/// `input_size + 1` columns.
///
/// Implementations own whatever forward caches their own backward pass needs;
/// ACT only reports gradients with respect to each iteration's output and
/// new state (see [`crate::pondering::PonderGradients`]).
pub trait RecurrentCell {
    fn cell_type(&self) -> &str {
        "RecurrentCell"
    }

    fn step(&mut self, input: &Array2<f32>, state: &CellState) -> Result<(Array2<f32>, CellState)>;
}

impl<C: RecurrentCell + ?Sized> RecurrentCell for Box<C> {
    fn cell_type(&self) -> &str {
        (**self).cell_type()
    }

    fn step(&mut self, input: &Array2<f32>, state: &CellState) -> Result<(Array2<f32>, CellState)> {
        (**self).step(input, state)
    }
}
