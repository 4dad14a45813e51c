//! Event data types passed between sources, builders and processors

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A raw, source-specific unit of data before structuring
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// Position of the record within its source, starting at 1
    pub id: u64,
    pub data: Vec<u8>,
}

impl Record {
    pub fn new(id: u64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }

    /// Size of the raw payload in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Kind of a structured event
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Ordinary detector readout
    #[default]
    Physics,
    /// Run is about to start; carries the run number
    PreStart,
    /// Run has ended
    EndRun,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Physics => write!(f, "physics"),
            EventKind::PreStart => write!(f, "prestart"),
            EventKind::EndRun => write!(f, "end"),
        }
    }
}

/// Normalized event produced by an event builder and consumed by processors
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructuredEvent {
    /// Identity of the record this event was built from
    pub record_id: u64,
    pub kind: EventKind,
    pub run: Option<u32>,
    /// Detector (conditions) name the event was built against
    pub detector: Arc<str>,
    pub payload: Vec<u8>,
}

impl StructuredEvent {
    pub fn is_end_of_run(&self) -> bool {
        self.kind == EventKind::EndRun
    }
}
