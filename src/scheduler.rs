//! Multi-step runs: fast-forward and animated.
//!
//! At most one run is registered at a time. Registering a new run cancels
//! the previous one, and the run gate keeps the two from ever stepping
//! concurrently: the new run starts stepping only once the old one has
//! observed its cancellation and released the gate.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::EngineError;
use crate::executor::{StepExecutor, StepOutcome};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RunTermination {
    Completed,
    Cancelled,
    /// No transition was enabled before the requested steps ran out.
    Stuck,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub termination: RunTermination,
    pub steps: u64,
}

#[derive(Default)]
struct Registry {
    current: Option<(u64, CancellationToken)>,
    next_id: u64,
}

/// A registered run. Dropping it marks the run finished unless a newer run
/// has taken its place.
pub struct RunTicket {
    id: u64,
    token: CancellationToken,
    registry: Arc<Mutex<Registry>>,
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        let mut registry = self.registry.lock();
        if matches!(&registry.current, Some((id, _)) if *id == self.id) {
            registry.current = None;
        }
    }
}

#[derive(Default)]
pub struct RunScheduler {
    registry: Arc<Mutex<Registry>>,
    gate: tokio::sync::Mutex<()>,
}

impl RunScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new run, cancelling whichever run was active.
    pub fn register(&self) -> RunTicket {
        let mut registry = self.registry.lock();
        if let Some((id, token)) = registry.current.take() {
            debug!(run = id, "superseding active run");
            token.cancel();
        }
        registry.next_id += 1;
        let id = registry.next_id;
        let token = CancellationToken::new();
        registry.current = Some((id, token.clone()));
        RunTicket {
            id,
            token,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Cancels the active run, if any. The run stops before its next step.
    pub fn stop(&self) {
        if let Some((id, token)) = &self.registry.lock().current {
            debug!(run = id, "stop requested");
            token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.registry.lock().current.is_some()
    }

    /// Cancels the active run and waits until it has stopped stepping.
    pub async fn exclusive(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.stop();
        self.gate.lock().await
    }

    /// Steps `executor` up to `steps` times, sleeping `delay` between steps
    /// when animated. Cancellation is observed between whole steps only.
    pub async fn drive(
        &self,
        executor: &StepExecutor,
        ticket: RunTicket,
        steps: u64,
        delay: Option<Duration>,
    ) -> Result<RunReport, EngineError> {
        let _gate = self.gate.lock().await;
        info!(run = ticket.id, steps, ?delay, "run started");

        let mut executed = 0;
        let termination = loop {
            if executed == steps {
                break RunTermination::Completed;
            }
            if ticket.token.is_cancelled() {
                break RunTermination::Cancelled;
            }
            match executor.run_step() {
                Ok(StepOutcome::Fired(_)) => executed += 1,
                Ok(StepOutcome::Stuck) => break RunTermination::Stuck,
                Err(e) => {
                    warn!(run = ticket.id, error = %e, "run aborted");
                    executor.record_error(format!("run stopped after {executed} steps: {e}"));
                    return Err(e);
                }
            }
            if let Some(delay) = delay.filter(|_| executed < steps) {
                tokio::select! {
                    _ = ticket.token.cancelled() => break RunTermination::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        };

        info!(run = ticket.id, ?termination, steps = executed, "run finished");
        Ok(RunReport {
            termination,
            steps: executed,
        })
    }
}
