//! Audit-trail sink boundary.
//!
//! After a successful business action the owning document may emit an
//! activity record here. This channel is fire-and-forget by contract: a
//! failing audit sink logs and drops the record, and must never roll back
//! the ledger transaction it describes.

use std::sync::RwLock;

use serde_json::Value;

use wardstock_core::ActorId;

/// Consumer-facing activity feed interface.
pub trait ActionRecorder: Send + Sync {
    /// Record a completed business action.
    ///
    /// Implementations swallow their own failures. There is deliberately
    /// no `Result` here: callers have nothing sensible to do with an
    /// audit failure.
    fn record_action(&self, actor: ActorId, action: &str, metadata: Value);
}

/// Emits activity records as structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingActionRecorder;

impl TracingActionRecorder {
    pub fn new() -> Self {
        Self
    }
}

impl ActionRecorder for TracingActionRecorder {
    fn record_action(&self, actor: ActorId, action: &str, metadata: Value) {
        tracing::info!(
            target: "wardstock::audit",
            actor = %actor,
            action,
            metadata = %metadata,
            "action recorded"
        );
    }
}

/// One captured activity record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAction {
    pub actor: ActorId,
    pub action: String,
    pub metadata: Value,
}

/// Captures activity records in memory. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryActionRecorder {
    actions: RwLock<Vec<RecordedAction>>,
}

impl InMemoryActionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn actions(&self) -> Vec<RecordedAction> {
        match self.actions.read() {
            Ok(actions) => actions.clone(),
            Err(_) => Vec::new(),
        }
    }
}

impl ActionRecorder for InMemoryActionRecorder {
    fn record_action(&self, actor: ActorId, action: &str, metadata: Value) {
        match self.actions.write() {
            Ok(mut actions) => actions.push(RecordedAction {
                actor,
                action: action.to_string(),
                metadata,
            }),
            Err(_) => {
                tracing::warn!(action, "audit sink lock poisoned, action dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn in_memory_recorder_captures_in_order() {
        let recorder = InMemoryActionRecorder::new();
        let actor = ActorId::new();

        recorder.record_action(actor, "goods_receipt.completed", json!({"lines": 3}));
        recorder.record_action(actor, "stock_issue.completed", json!({"lines": 1}));

        let actions = recorder.actions();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].action, "goods_receipt.completed");
        assert_eq!(actions[1].metadata, json!({"lines": 1}));
    }
}
