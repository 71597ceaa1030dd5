use aurora_types::Phase;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Payload carried by every `WorkflowEvent` (spec §6 WebSocket contract).
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowEventData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// `WorkflowEvent` pushed over `/ws/workflows/{id}` (spec §6). Events for a
/// given workflow are delivered to subscribers in commit order; a late
/// subscriber receives only the current snapshot, never a replay.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    StateChange {
        workflow_id: String,
        data: WorkflowEventData,
    },
    ApprovalRequired {
        workflow_id: String,
        data: WorkflowEventData,
    },
    TaskComplete {
        workflow_id: String,
        data: WorkflowEventData,
    },
    Error {
        workflow_id: String,
        data: WorkflowEventData,
    },
}

impl WorkflowEvent {
    pub fn workflow_id(&self) -> &str {
        match self {
            WorkflowEvent::StateChange { workflow_id, .. }
            | WorkflowEvent::ApprovalRequired { workflow_id, .. }
            | WorkflowEvent::TaskComplete { workflow_id, .. }
            | WorkflowEvent::Error { workflow_id, .. } => workflow_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_tagged_type_field() {
        let event = WorkflowEvent::StateChange {
            workflow_id: "wf_1".into(),
            data: WorkflowEventData {
                phase: Some(Phase::Design),
                timestamp: Utc::now(),
                ..Default::default()
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "state_change");
        assert_eq!(value["workflow_id"], "wf_1");
        assert_eq!(value["data"]["phase"], "design");
    }
}
