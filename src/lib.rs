//! Simulation controller for Colored Petri Nets.
//!
//! [`SimulationController`] drives a net engine through single steps,
//! explicit firings and cancellable multi-step runs, keeps an event log and
//! pauses the editor's undo history while the simulation mutates the net.
//! [`JsonNetLoader`] provides the engine for the editor's JSON documents.

mod adapter;
pub mod config;
mod controller;
pub mod engine;
mod error;
mod events;
mod executor;
pub mod model;
mod scheduler;
mod undo;

#[cfg(test)]
mod testing;

pub use adapter::NetEngineAdapter;
pub use config::SimulationConfig;
pub use controller::SimulationController;
pub use engine::{
    EnabledTransition, EngineError, EngineInitError, EngineLoader, Firing, JsonNetLoader, Marking,
    NetEngine, Simulator,
};
pub use error::SimulationError;
pub use events::{EventKind, EventLog, SimulationEvent};
pub use executor::{ControllerState, StepExecutor, StepOutcome};
pub use scheduler::{RunReport, RunScheduler, RunTermination, RunTicket};
pub use undo::{NoopUndoTracker, UndoPause, UndoTracker};
