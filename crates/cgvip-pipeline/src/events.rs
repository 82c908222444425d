//! Pipeline event system for observability.
//!
//! Emits [`PipelineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! in-process observers can follow a run without coupling to the orchestrator.

use serde::{Deserialize, Serialize};

use cgvip_types::ApprovalState;

/// Events emitted during a governance run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    RunStarted {
        run_id: String,
        target: String,
        record_count: usize,
    },
    StageStarted {
        run_id: String,
        agent_id: String,
    },
    StageCompleted {
        run_id: String,
        agent_id: String,
        approval_state: ApprovalState,
        duration_ms: u64,
    },
    PayloadMerged {
        agent_id: String,
        keys: Vec<String>,
    },
    RunHalted {
        run_id: String,
        agent_id: String,
        errors: Vec<String>,
    },
    RunCompleted {
        run_id: String,
        staged_records: usize,
        duration_ms: u64,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers. Dropped when nobody listens.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
