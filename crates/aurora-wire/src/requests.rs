use aurora_types::WorkflowMode;
use serde::Deserialize;
use serde_json::Value;

/// `POST /api/v1/workflows` (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct StartWorkflowRequest {
    pub project_id: String,
    pub mode: WorkflowMode,
    pub description: String,
}

/// `POST /api/v1/workflows/{id}/approval` (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalRequest {
    pub approved: bool,
    pub reviewer_id: String,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub modifications: Option<Value>,
}

/// Query parameters for `POST /api/v1/workflows/{id}/pause`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PauseQuery {
    pub reason: Option<String>,
}

/// Query parameters for `GET /api/v1/workflows/pending-approvals`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PendingApprovalsQuery {
    pub project_id: Option<String>,
}

/// Query parameters for `GET /api/v1/dashboard/stats`.
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardStatsQuery {
    pub project_id: Option<String>,
    #[serde(default = "default_period_days")]
    pub period_days: u32,
}

fn default_period_days() -> u32 {
    7
}
