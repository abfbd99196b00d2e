//! The controller the editor talks to.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::adapter::NetEngineAdapter;
use crate::config::SimulationConfig;
use crate::engine::{EnabledTransition, EngineError, EngineLoader, JsonNetLoader, Marking};
use crate::error::SimulationError;
use crate::events::SimulationEvent;
use crate::executor::{ControllerState, StepExecutor, StepOutcome};
use crate::scheduler::{RunReport, RunScheduler, RunTicket};
use crate::undo::{UndoPause, UndoTracker};

/// Drives one open net. Create one per editor session and share it by
/// reference (or `Arc`).
///
/// Every operation that can change the marking initializes the engine
/// first and keeps undo tracking paused until it returns. Single steps,
/// firings and resets cancel an active run and wait for it to stop
/// before touching the engine.
pub struct SimulationController {
    executor: StepExecutor,
    scheduler: RunScheduler,
    undo: Arc<dyn UndoTracker>,
    config: SimulationConfig,
}

impl SimulationController {
    pub fn new(
        loader: impl EngineLoader + 'static,
        undo: Arc<dyn UndoTracker>,
        config: SimulationConfig,
    ) -> Self {
        let executor = StepExecutor::new(NetEngineAdapter::new(loader), config.event_channel_capacity);
        Self {
            executor,
            scheduler: RunScheduler::new(),
            undo,
            config,
        }
    }

    /// Controller over the editor's JSON net document, loaded on first use.
    pub fn from_json(
        document: impl Into<String>,
        undo: Arc<dyn UndoTracker>,
        config: SimulationConfig,
    ) -> Self {
        let loader = JsonNetLoader::new(document, &config);
        Self::new(loader, undo, config)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn pause_undo(&self) -> UndoPause<'_> {
        UndoPause::new(self.undo.as_ref())
    }

    async fn initialize(&self) -> Result<(), SimulationError> {
        self.executor
            .adapter()
            .initialize_with(|e| self.executor.record_error(e.to_string()))
            .await?;
        Ok(())
    }

    pub async fn ensure_initialized(&self) -> Result<(), SimulationError> {
        let _undo = self.pause_undo();
        self.initialize().await
    }

    /// Fires one engine-chosen transition. A stuck net is not an error.
    pub async fn run_step(&self) -> Result<StepOutcome, SimulationError> {
        let _undo = self.pause_undo();
        self.initialize().await?;
        let _gate = self.scheduler.exclusive().await;
        Ok(self.executor.run_step()?)
    }

    pub async fn fire_transition(
        &self,
        transition_id: &str,
    ) -> Result<EnabledTransition, SimulationError> {
        let _undo = self.pause_undo();
        self.initialize().await?;
        let _gate = self.scheduler.exclusive().await;
        Ok(self.executor.fire_transition(transition_id)?)
    }

    pub async fn run_multiple_steps_fast(&self, steps: u64) -> Result<RunReport, SimulationError> {
        let ticket = self.scheduler.register();
        self.run(ticket, steps, None).await
    }

    /// Steps with a pause between steps; `delay` defaults to the configured
    /// animation delay.
    pub async fn run_multiple_steps_animated(
        &self,
        steps: u64,
        delay: Option<Duration>,
    ) -> Result<RunReport, SimulationError> {
        let ticket = self.scheduler.register();
        let delay = delay.unwrap_or_else(|| self.config.animation_delay());
        self.run(ticket, steps, Some(delay)).await
    }

    /// Starts an animated run on the runtime and returns at once.
    ///
    /// The run is registered before this returns, so a following
    /// [`stop`](Self::stop) always reaches it.
    pub fn spawn_animated(
        self: &Arc<Self>,
        steps: u64,
        delay: Option<Duration>,
    ) -> JoinHandle<Result<RunReport, SimulationError>> {
        let ticket = self.scheduler.register();
        let delay = delay.unwrap_or_else(|| self.config.animation_delay());
        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.run(ticket, steps, Some(delay)).await })
    }

    async fn run(
        &self,
        ticket: RunTicket,
        steps: u64,
        delay: Option<Duration>,
    ) -> Result<RunReport, SimulationError> {
        let _undo = self.pause_undo();
        self.initialize().await?;
        Ok(self.scheduler.drive(&self.executor, ticket, steps, delay).await?)
    }

    /// Cancels the active run. Safe to call at any time.
    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// Stops any run, then restores the initial marking and time.
    /// The event log is kept.
    pub async fn reset(&self) -> Result<(), SimulationError> {
        let _undo = self.pause_undo();
        self.stop();
        self.initialize().await?;
        let _gate = self.scheduler.exclusive().await;
        self.executor.reset()?;
        info!("simulation reset");
        Ok(())
    }

    /// Transitions enabled right now. Empty before initialization.
    pub fn get_enabled_transitions(&self) -> Result<Vec<EnabledTransition>, SimulationError> {
        match self.executor.adapter().query_enabled_transitions() {
            Err(EngineError::NotInitialized) => Ok(Vec::new()),
            other => Ok(other?),
        }
    }

    /// Fresh copy of the engine's marking. Empty before initialization.
    pub fn marking(&self) -> Result<Marking, SimulationError> {
        match self.executor.adapter().marking() {
            Err(EngineError::NotInitialized) => Ok(Marking::new()),
            other => Ok(other?),
        }
    }

    pub fn clear_events(&self) {
        self.executor.clear_events();
    }

    pub fn events(&self) -> Vec<SimulationEvent> {
        self.executor.events()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SimulationEvent> {
        self.executor.subscribe()
    }

    pub fn state(&self) -> ControllerState {
        ControllerState {
            is_running: self.scheduler.is_running(),
            ..self.executor.state()
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.executor.adapter().is_initialized()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn simulation_time(&self) -> i64 {
        self.executor.state().simulation_time
    }

    pub fn step_counter(&self) -> u64 {
        self.executor.state().step_counter
    }
}
