use std::collections::HashMap;
use std::sync::Arc;

use aurora_wire::WorkflowEvent;
use tokio::sync::{broadcast, RwLock};

const TOPIC_CAPACITY: usize = 1024;

struct Topic {
    tx: broadcast::Sender<WorkflowEvent>,
    /// The most recently published event on this topic. A subscriber that
    /// joins after earlier events were committed gets this snapshot instead
    /// of a replay (spec §4.8: "late subscribers receive the latest
    /// snapshot, not a replay").
    latest: Option<WorkflowEvent>,
}

/// Single-writer, multi-reader event bus with one topic per workflow (spec
/// §4.8). Every state transition is broadcast here after being appended to
/// the durable event log, so subscribers always see committed state.
#[derive(Clone)]
pub struct EventBus {
    topics: Arc<RwLock<HashMap<String, Topic>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Broadcasts an event on its workflow's topic, creating the topic if
    /// this is the first event. A publish with no active subscribers is not
    /// an error: the event is simply recorded as the topic's latest
    /// snapshot for the next subscriber to see.
    pub async fn publish(&self, event: WorkflowEvent) {
        let workflow_id = event.workflow_id().to_string();
        let mut topics = self.topics.write().await;
        let topic = topics.entry(workflow_id).or_insert_with(|| Topic {
            tx: broadcast::channel(TOPIC_CAPACITY).0,
            latest: None,
        });
        let _ = topic.tx.send(event.clone());
        topic.latest = Some(event);
    }

    /// Subscribes to a workflow's topic, returning a receiver plus the
    /// current latest snapshot (if any events were already committed).
    pub async fn subscribe(
        &self,
        workflow_id: &str,
    ) -> (broadcast::Receiver<WorkflowEvent>, Option<WorkflowEvent>) {
        let mut topics = self.topics.write().await;
        let topic = topics
            .entry(workflow_id.to_string())
            .or_insert_with(|| Topic {
                tx: broadcast::channel(TOPIC_CAPACITY).0,
                latest: None,
            });
        (topic.tx.subscribe(), topic.latest.clone())
    }

    pub async fn latest(&self, workflow_id: &str) -> Option<WorkflowEvent> {
        self.topics.read().await.get(workflow_id)?.latest.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurora_wire::WorkflowEventData;
    use chrono::Utc;

    fn event(workflow_id: &str) -> WorkflowEvent {
        WorkflowEvent::StateChange {
            workflow_id: workflow_id.to_string(),
            data: WorkflowEventData {
                timestamp: Utc::now(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn late_subscriber_gets_latest_snapshot_not_replay() {
        let bus = EventBus::new();
        bus.publish(event("wf_1")).await;
        bus.publish(event("wf_1")).await;

        let (mut rx, latest) = bus.subscribe("wf_1").await;
        assert!(latest.is_some());
        assert!(rx.try_recv().is_err(), "no buffered replay for late joiners");
    }

    #[tokio::test]
    async fn events_are_isolated_per_workflow_topic() {
        let bus = EventBus::new();
        let (mut rx_a, _) = bus.subscribe("wf_a").await;
        let (mut rx_b, _) = bus.subscribe("wf_b").await;

        bus.publish(event("wf_a")).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }
}
