pub mod act;
pub mod adam;
pub mod binary_step;
pub mod cell;
pub mod config;
pub mod errors;
pub mod halting;
pub mod persistence;
pub mod ponder;
pub mod pondering;
pub mod state;
// Re-export key structs for easier access
pub use act::ActCell;
pub use adam::Adam;
pub use binary_step::{BinaryStep, binary_step, binary_step_backward};
pub use cell::RecurrentCell;
pub use config::ActConfig;
pub use errors::{ActError, Result};
pub use halting::{HaltingActivation, HaltingUnit};
pub use persistence::{ActCheckpoint, CheckpointMetadata, VersionedCheckpoint};
pub use ponder::PonderCost;
pub use pondering::{
    ActCarry, HaltingState, IterationGradients, PonderGradients, PonderIteration, PonderOutcome,
};
pub use state::CellState;
