//! Lifecycle event bus.
//!
//! The runner publishes one typed event per step or checkpoint to a bounded
//! broadcast channel; subscribers pull asynchronously through
//! [`EventBus::subscribe`]. Delivery is best-effort — a dropped or lagging
//! subscriber never affects pipeline correctness, and idempotent transitions
//! absorb any re-delivery on the consumer side.

use qaflow_core::types::PipelineStep;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

// ---------------------------------------------------------------------------
// PipelineEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    StepStarted {
        run_id: String,
        step: PipelineStep,
    },
    StepCompleted {
        run_id: String,
        step: PipelineStep,
    },
    StepFailed {
        run_id: String,
        step: PipelineStep,
        error: String,
    },
    StepSkipped {
        run_id: String,
        step: PipelineStep,
    },
    ApprovalRequired {
        run_id: String,
    },
    ConfirmationRequired {
        run_id: String,
    },
    PipelineResumed {
        run_id: String,
        from_step: PipelineStep,
    },
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Send failures (no subscribers) are ignored.
    pub fn publish(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> BroadcastStream<PipelineEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe();

        bus.publish(PipelineEvent::StepStarted {
            run_id: "run-1".into(),
            step: PipelineStep::Initialize,
        });
        bus.publish(PipelineEvent::StepCompleted {
            run_id: "run-1".into(),
            step: PipelineStep::Initialize,
        });

        let first = sub.next().await.unwrap().unwrap();
        assert!(matches!(first, PipelineEvent::StepStarted { .. }));
        let second = sub.next().await.unwrap().unwrap();
        assert!(matches!(second, PipelineEvent::StepCompleted { .. }));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.publish(PipelineEvent::ApprovalRequired {
            run_id: "run-1".into(),
        });
    }

    #[test]
    fn event_wire_form() {
        let e = PipelineEvent::StepFailed {
            run_id: "run-1".into(),
            step: PipelineStep::TestExecution,
            error: "browser crashed".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"type\":\"step_failed\""));
        assert!(json.contains("\"step\":\"test_execution\""));
    }
}
