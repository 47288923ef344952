use ndarray::{Array2, Axis, concatenate, s};
use serde::{Deserialize, Serialize};

use crate::errors::{ActError, Result};

/// Recurrent state handed to and returned by a wrapped cell.
///
/// Cells with a single hidden tensor use `Flat`; cells that keep a
/// memory/output pair (LSTM style) use `Paired(memory, output)`. The pondering
/// loop works on the concatenated form and converts at its boundary.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum CellState {
    Flat(Array2<f32>),
    Paired(Array2<f32>, Array2<f32>),
}

impl CellState {
    pub fn zeros(batch_size: usize, num_units: usize, paired: bool) -> Self {
        if paired {
            let half = num_units / 2;
            CellState::Paired(Array2::zeros((batch_size, half)), Array2::zeros((batch_size, half)))
        } else {
            CellState::Flat(Array2::zeros((batch_size, num_units)))
        }
    }

    pub fn is_paired(&self) -> bool {
        matches!(self, CellState::Paired(..))
    }

    pub fn batch_size(&self) -> usize {
        match self {
            CellState::Flat(s) => s.nrows(),
            CellState::Paired(c, _) => c.nrows(),
        }
    }

    /// Total width of the concatenated representation.
    pub fn width(&self) -> usize {
        match self {
            CellState::Flat(s) => s.ncols(),
            CellState::Paired(c, h) => c.ncols() + h.ncols(),
        }
    }

    /// Concatenate into a single `(batch, width)` tensor.
    pub fn to_flat(&self) -> Result<Array2<f32>> {
        match self {
            CellState::Flat(s) => Ok(s.clone()),
            CellState::Paired(c, h) => {
                if c.dim() != h.dim() {
                    return Err(ActError::shape(
                        "paired state halves",
                        &[c.nrows(), c.ncols()],
                        &[h.nrows(), h.ncols()],
                    ));
                }
                concatenate(Axis(1), &[c.view(), h.view()]).map_err(|e| ActError::InvalidInput {
                    message: format!("cannot concatenate paired state: {}", e),
                })
            }
        }
    }

    /// Inverse of [`CellState::to_flat`]; a paired split cuts the columns in half.
    pub fn from_flat(flat: Array2<f32>, paired: bool) -> Result<Self> {
        if !paired {
            return Ok(CellState::Flat(flat));
        }
        let width = flat.ncols();
        if width % 2 != 0 {
            return Err(ActError::InvalidInput {
                message: format!("paired state needs an even width, got {}", width),
            });
        }
        let half = width / 2;
        let c = flat.slice(s![.., ..half]).to_owned();
        let h = flat.slice(s![.., half..]).to_owned();
        Ok(CellState::Paired(c, h))
    }

    /// The tensor the halting unit reads: the whole state, or the memory half of a pair.
    pub fn halting_source(&self) -> &Array2<f32> {
        match self {
            CellState::Flat(s) => s,
            CellState::Paired(c, _) => c,
        }
    }
}
