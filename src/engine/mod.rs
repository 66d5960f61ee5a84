//! Engine: shared state and the poll loop.

pub mod poll;
pub mod state;

pub use poll::{CycleOutcome, Engine};
pub use state::{EngineState, EngineStats};
