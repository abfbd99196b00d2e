//! The net engine contract and the Rhai-backed engine that implements it.
//!
//! The engine owns the authoritative marking. Everything above this module
//! only sees [`EnabledTransition`] snapshots, [`Firing`] reports and
//! [`Marking`] copies.

mod loader;
mod simulator;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use loader::JsonNetLoader;
pub use simulator::Simulator;

/// Tokens per place id, as JSON values.
pub type Marking = BTreeMap<String, Vec<serde_json::Value>>;

/// A transition the engine currently permits to fire.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnabledTransition {
    pub transition_id: String,
    pub transition_name: String,
}

/// What one firing did to the net.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Firing {
    pub transition_id: String,
    pub transition_name: String,
    /// Engine time after the firing, in milliseconds.
    pub simulation_time: i64,
    pub consumed: Marking,
    pub produced: Marking,
}

#[derive(Debug, Clone, Error)]
#[error("engine initialization failed: {0}")]
pub struct EngineInitError(pub String);

impl EngineInitError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("transition `{0}` is not enabled")]
    NotEnabled(String),
    #[error("no transition is enabled")]
    NoEnabledTransition,
    #[error("failed to evaluate {context}: {message}")]
    Evaluation { context: String, message: String },
    #[error("engine is not initialized")]
    NotInitialized,
}

/// A loaded net that can be queried and fired.
///
/// Implementations are synchronous; the adapter serializes access.
pub trait NetEngine: Send {
    fn enabled_transitions(&self) -> Result<Vec<EnabledTransition>, EngineError>;

    /// Fires `transition_id` under one of its enabled bindings.
    fn fire(&mut self, transition_id: &str) -> Result<Firing, EngineError>;

    /// Picks one enabled transition by priority and fires it.
    fn step_any(&mut self) -> Result<Firing, EngineError>;

    /// Restores the initial marking and time zero.
    fn reset(&mut self);

    fn marking(&self) -> Marking;

    fn current_time(&self) -> i64;
}

/// Builds a [`NetEngine`]; called at most once per successful initialization.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self) -> Result<Box<dyn NetEngine>, EngineInitError>;
}
