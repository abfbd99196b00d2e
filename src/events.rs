//! Append-only record of what the simulation did.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::engine::Firing;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Step,
    Fire,
    Reset,
    Error,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimulationEvent {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub simulation_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SimulationEvent {
    fn new(kind: EventKind, simulation_time: i64) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            simulation_time,
            transition_id: None,
            transition_name: None,
            message: None,
        }
    }

    pub fn firing(kind: EventKind, simulation_time: i64, firing: &Firing) -> Self {
        Self {
            transition_id: Some(firing.transition_id.clone()),
            transition_name: Some(firing.transition_name.clone()),
            ..Self::new(kind, simulation_time)
        }
    }

    pub fn reset(simulation_time: i64) -> Self {
        Self::new(EventKind::Reset, simulation_time)
    }

    pub fn error(simulation_time: i64, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(EventKind::Error, simulation_time)
        }
    }
}

/// Events in append order, mirrored to subscribers as they arrive.
pub struct EventLog {
    entries: Vec<SimulationEvent>,
    sender: broadcast::Sender<SimulationEvent>,
}

impl EventLog {
    pub fn new(channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            entries: Vec::new(),
            sender,
        }
    }

    pub fn append(&mut self, event: SimulationEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event.clone());
        self.entries.push(event);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[SimulationEvent] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SimulationEvent> {
        self.sender.subscribe()
    }
}
