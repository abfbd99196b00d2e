//! Test doubles for the engine, its loader and the undo store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::engine::{
    EnabledTransition, EngineError, EngineInitError, EngineLoader, Firing, Marking, NetEngine,
};
use crate::undo::UndoTracker;

const TRANSITIONS: [(&str, &str); 2] = [("produce", "Produce"), ("consume", "Consume")];
const TICK_MS: i64 = 100;

/// Two always-enabled transitions sharing a firing budget. Each firing
/// takes 100 ms of simulated time.
pub(crate) struct ScriptedEngine {
    budget: u32,
    remaining: u32,
    time: i64,
    attempts: u32,
    fail_at: Option<u32>,
}

impl ScriptedEngine {
    pub(crate) fn new(budget: u32) -> Self {
        Self {
            budget,
            remaining: budget,
            time: 0,
            attempts: 0,
            fail_at: None,
        }
    }

    /// The `attempt`-th firing (1-based) fails with an evaluation error.
    pub(crate) fn failing_at(mut self, attempt: u32) -> Self {
        self.fail_at = Some(attempt);
        self
    }

    fn commit(&mut self, transition_id: &str) -> Result<Firing, EngineError> {
        self.attempts += 1;
        if self.fail_at == Some(self.attempts) {
            return Err(EngineError::Evaluation {
                context: format!("transition {transition_id}"),
                message: "scripted failure".into(),
            });
        }
        let (id, name) = TRANSITIONS
            .iter()
            .find(|(id, _)| *id == transition_id)
            .ok_or_else(|| EngineError::NotEnabled(transition_id.to_string()))?;
        self.remaining -= 1;
        self.time += TICK_MS;
        Ok(Firing {
            transition_id: id.to_string(),
            transition_name: name.to_string(),
            simulation_time: self.time,
            consumed: Marking::new(),
            produced: Marking::new(),
        })
    }
}

impl NetEngine for ScriptedEngine {
    fn enabled_transitions(&self) -> Result<Vec<EnabledTransition>, EngineError> {
        if self.remaining == 0 {
            return Ok(Vec::new());
        }
        Ok(TRANSITIONS
            .iter()
            .map(|(id, name)| EnabledTransition {
                transition_id: id.to_string(),
                transition_name: name.to_string(),
            })
            .collect())
    }

    fn fire(&mut self, transition_id: &str) -> Result<Firing, EngineError> {
        if self.remaining == 0 || !TRANSITIONS.iter().any(|(id, _)| *id == transition_id) {
            return Err(EngineError::NotEnabled(transition_id.to_string()));
        }
        self.commit(transition_id)
    }

    fn step_any(&mut self) -> Result<Firing, EngineError> {
        if self.remaining == 0 {
            return Err(EngineError::NoEnabledTransition);
        }
        self.commit(TRANSITIONS[0].0)
    }

    fn reset(&mut self) {
        self.remaining = self.budget;
        self.time = 0;
    }

    fn marking(&self) -> Marking {
        Marking::from([("pool".to_string(), vec![serde_json::json!(self.remaining)])])
    }

    fn current_time(&self) -> i64 {
        self.time
    }
}

#[derive(Clone, Default)]
pub(crate) struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn incr(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) struct CountingLoader {
    factory: Box<dyn Fn() -> ScriptedEngine + Send + Sync>,
    loads: Counter,
    delay: Option<Duration>,
    failures_left: AtomicUsize,
}

impl CountingLoader {
    pub(crate) fn new(factory: impl Fn() -> ScriptedEngine + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            loads: Counter::default(),
            delay: None,
            failures_left: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn failing_first(self, failures: usize) -> Self {
        self.failures_left.store(failures, Ordering::SeqCst);
        self
    }

    pub(crate) fn loads(&self) -> Counter {
        self.loads.clone()
    }
}

#[async_trait]
impl EngineLoader for CountingLoader {
    async fn load(&self) -> Result<Box<dyn NetEngine>, EngineInitError> {
        self.loads.incr();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(EngineInitError::new("scripted load failure"));
        }
        Ok(Box::new((self.factory)()))
    }
}

#[derive(Default)]
pub(crate) struct RecordingUndo {
    calls: Mutex<Vec<&'static str>>,
}

impl RecordingUndo {
    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub(crate) fn pauses(&self) -> usize {
        self.calls.lock().iter().filter(|c| **c == "pause").count()
    }

    pub(crate) fn depth(&self) -> i64 {
        self.calls
            .lock()
            .iter()
            .map(|c| if *c == "pause" { 1 } else { -1 })
            .sum()
    }

    /// Never resumed more than paused, and nothing left paused.
    pub(crate) fn is_balanced(&self) -> bool {
        let mut depth = 0_i64;
        for call in self.calls.lock().iter() {
            depth += if *call == "pause" { 1 } else { -1 };
            if depth < 0 {
                return false;
            }
        }
        depth == 0
    }
}

impl UndoTracker for RecordingUndo {
    fn pause_undo(&self) {
        self.calls.lock().push("pause");
    }

    fn resume_undo(&self) {
        self.calls.lock().push("resume");
    }
}
