//! One unit of simulated progress and its bookkeeping.

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::adapter::NetEngineAdapter;
use crate::engine::{EnabledTransition, EngineError, Firing};
use crate::events::{EventKind, EventLog, SimulationEvent};

/// Counters owned by the controller. The marking lives in the engine.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ControllerState {
    pub is_initialized: bool,
    pub is_running: bool,
    pub simulation_time: i64,
    pub step_counter: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Fired(EnabledTransition),
    /// Nothing was enabled; nothing changed.
    Stuck,
}

pub struct StepExecutor {
    adapter: NetEngineAdapter,
    state: Mutex<ControllerState>,
    log: Mutex<EventLog>,
}

impl StepExecutor {
    pub fn new(adapter: NetEngineAdapter, event_channel_capacity: usize) -> Self {
        Self {
            adapter,
            state: Mutex::new(ControllerState::default()),
            log: Mutex::new(EventLog::new(event_channel_capacity)),
        }
    }

    pub fn adapter(&self) -> &NetEngineAdapter {
        &self.adapter
    }

    pub fn run_step(&self) -> Result<StepOutcome, EngineError> {
        match self.adapter.step_any() {
            Ok(firing) => {
                self.record(EventKind::Step, &firing);
                Ok(StepOutcome::Fired(fired(firing)))
            }
            Err(EngineError::NoEnabledTransition) => {
                debug!("step skipped, net is stuck");
                Ok(StepOutcome::Stuck)
            }
            Err(e) => Err(e),
        }
    }

    pub fn fire_transition(&self, transition_id: &str) -> Result<EnabledTransition, EngineError> {
        let firing = self.adapter.fire(transition_id)?;
        self.record(EventKind::Fire, &firing);
        Ok(fired(firing))
    }

    /// Resets the engine and the counters, then logs a `Reset` event.
    pub fn reset(&self) -> Result<(), EngineError> {
        self.adapter.reset()?;
        let mut state = self.state.lock();
        state.step_counter = 0;
        state.simulation_time = 0;
        self.log.lock().append(SimulationEvent::reset(0));
        Ok(())
    }

    pub fn record_error(&self, message: impl Into<String>) {
        let state = self.state.lock();
        self.log
            .lock()
            .append(SimulationEvent::error(state.simulation_time, message));
    }

    fn record(&self, kind: EventKind, firing: &Firing) {
        // Lock order: state, then log.
        let mut state = self.state.lock();
        state.step_counter += 1;
        state.simulation_time = state.simulation_time.max(firing.simulation_time);
        self.log
            .lock()
            .append(SimulationEvent::firing(kind, state.simulation_time, firing));
    }

    pub fn state(&self) -> ControllerState {
        ControllerState {
            is_initialized: self.adapter.is_initialized(),
            ..*self.state.lock()
        }
    }

    pub fn events(&self) -> Vec<SimulationEvent> {
        self.log.lock().entries().to_vec()
    }

    pub fn clear_events(&self) {
        self.log.lock().clear();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SimulationEvent> {
        self.log.lock().subscribe()
    }
}

fn fired(firing: Firing) -> EnabledTransition {
    EnabledTransition {
        transition_id: firing.transition_id,
        transition_name: firing.transition_name,
    }
}
