use thiserror::Error;

use crate::engine::{EngineError, EngineInitError};

/// Errors surfaced by [`SimulationController`](crate::SimulationController).
///
/// A stuck net and a cancelled run are not errors; they come back as
/// [`StepOutcome::Stuck`](crate::StepOutcome) and
/// [`RunTermination`](crate::RunTermination) values.
#[derive(Debug, Clone, Error)]
pub enum SimulationError {
    #[error(transparent)]
    EngineInit(#[from] EngineInitError),
    #[error("transition `{transition_id}` is not enabled")]
    NotEnabled { transition_id: String },
    #[error("engine error: {0}")]
    Engine(EngineError),
}

impl SimulationError {
    pub fn is_not_enabled(&self) -> bool {
        matches!(self, SimulationError::NotEnabled { .. })
    }
}

impl From<EngineError> for SimulationError {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::NotEnabled(transition_id) => SimulationError::NotEnabled { transition_id },
            other => SimulationError::Engine(other),
        }
    }
}
