use aurora_types::{Phase, WorkflowMode, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// `POST /api/v1/workflows` response.
#[derive(Debug, Clone, Serialize)]
pub struct StartWorkflowResponse {
    pub workflow_id: String,
    pub status: WorkflowStatus,
}

/// A breakpoint payload embedded in `WorkflowState` while a workflow is
/// suspended awaiting human approval (spec §3 Breakpoint).
#[derive(Debug, Clone, Serialize)]
pub struct BreakpointView {
    pub checkpoint_name: String,
    pub reason: String,
    pub context: Value,
    pub created_at: DateTime<Utc>,
    pub requires_approval: bool,
}

/// An immutable decision record, as surfaced in approval history.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRecordView {
    pub approval_id: String,
    pub approved: bool,
    pub reviewer_id: String,
    pub comments: Option<String>,
    pub modifications: Option<Value>,
    pub decided_at: DateTime<Utc>,
}

/// `GET /api/v1/workflows/{id}/state` response body.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub project_id: String,
    pub mode: WorkflowMode,
    pub phase: Phase,
    pub status: WorkflowStatus,
    pub revision: u64,
    pub progress: f32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub breakpoint: Option<BreakpointView>,
    pub approval_history: Vec<ApprovalRecordView>,
    pub budget_cap: f64,
    pub actual_cost: f64,
}

/// One row of `GET /api/v1/workflows/pending-approvals`.
#[derive(Debug, Clone, Serialize)]
pub struct PendingApprovalEntry {
    pub workflow_id: String,
    pub project_id: String,
    pub checkpoint_name: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingApprovalsResponse {
    pub pending: Vec<PendingApprovalEntry>,
    pub total: usize,
}

/// `POST /api/v1/workflows/{id}/approval` response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApprovalResponse {
    Resumed { resumed_at: DateTime<Utc> },
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct PauseResponse {
    pub paused_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumeResponse {
    pub resumed_at: DateTime<Utc>,
}

/// `GET /api/v1/dashboard/stats` response body.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub period_days: u32,
    pub total_workflows: usize,
    pub completed: usize,
    pub failed: usize,
    pub paused: usize,
    pub total_cost: f64,
    pub total_tasks: usize,
    pub tasks_succeeded: usize,
    pub tasks_failed: usize,
    pub average_attempts_per_task: f64,
}

/// The `{kind, message, context}` error triple every API boundary returns
/// (spec §7); never a raw stack trace.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}
