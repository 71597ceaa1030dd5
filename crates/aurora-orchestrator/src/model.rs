use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aurora_types::{
    AgentId, AgentRole, ApprovalId, BreakpointId, ModelTier, Phase, ProjectId, TaskId,
    TaskStatus, WorkflowId, WorkflowMode, WorkflowStatus,
};

/// Aggregate root (spec §3 Project). Created on submission, mutated only by
/// the workflow state machine, destroyed only on explicit user request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub phase: Phase,
    pub mode: WorkflowMode,
    pub status: WorkflowStatus,
    pub budget_cap: f64,
    pub actual_cost: f64,
    /// Per-project configuration layer (SPEC_FULL.md §3 ambient attribute),
    /// deep-merged under `aurora_core::ConfigStore`.
    #[serde(default)]
    pub config_overrides: serde_json::Value,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl Project {
    pub fn new(id: ProjectId, description: String, mode: WorkflowMode, budget_cap: f64) -> Self {
        Self {
            id,
            description,
            created_at: Utc::now(),
            phase: Phase::Idle,
            mode,
            status: WorkflowStatus::Starting,
            budget_cap,
            actual_cost: 0.0,
            config_overrides: serde_json::Value::Null,
            created_by: None,
        }
    }
}

/// One execution of a project (spec §3 Workflow). Retained forever as
/// append-only history once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub project_id: ProjectId,
    pub mode: WorkflowMode,
    pub phase: Phase,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub progress: f32,
    pub breakpoint: Option<Breakpoint>,
    pub approval_history: Vec<ApprovalRecord>,
    /// Monotonically increasing, incremented on every persisted transition
    /// (SPEC_FULL.md §3, satisfies the §8 "monotonically increasing
    /// version" testable property).
    pub revision: u64,
    pub budget_cap: f64,
    pub actual_cost: f64,
}

impl Workflow {
    pub fn new(project: &Project) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            project_id: project.id.clone(),
            mode: project.mode,
            phase: Phase::Idle,
            status: WorkflowStatus::Starting,
            started_at: now,
            updated_at: now,
            progress: 0.0,
            breakpoint: None,
            approval_history: Vec::new(),
            revision: 1,
            budget_cap: project.budget_cap,
            actual_cost: project.actual_cost,
        }
    }
}

/// A suspend-and-await-human marker attached to a workflow (spec §3
/// Breakpoint). Exclusively owned by its workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub checkpoint_name: String,
    pub reason: String,
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub requires_approval: bool,
    /// The phase the workflow was in when this breakpoint fired, so
    /// approval can resume back into it (spec §4.2 Approval resolution).
    pub originating_phase: Phase,
}

/// An immutable decision record (spec §3 ApprovalRecord).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub approval_id: ApprovalId,
    pub approved: bool,
    pub reviewer_id: String,
    pub comments: Option<String>,
    pub modifications: Option<serde_json::Value>,
    pub decided_at: DateTime<Utc>,
}

/// Atomic unit of work (spec §3 Task).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub workflow_id: WorkflowId,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    /// 1-10 integer.
    pub complexity: u8,
    pub estimated_tokens: usize,
    pub file_paths: Vec<String>,
    pub hard_deps: HashSet<TaskId>,
    pub soft_deps: HashSet<TaskId>,
    pub status: TaskStatus,
    pub assigned_agent: Option<AgentId>,
    pub attempt_count: u32,
    pub last_result: Option<TaskResult>,
    /// Required input to agent assignment's specialization factor
    /// (SPEC_FULL.md §3 Task).
    pub role: AgentRole,
    /// Written by complexity routing, upgradable by the self-correction
    /// loop on retry (SPEC_FULL.md §3 Task).
    pub model_tier: ModelTier,
    pub created_at: DateTime<Utc>,
    pub ready_at: Option<DateTime<Utc>>,
}

impl Task {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workflow_id: WorkflowId,
        title: String,
        description: String,
        role: AgentRole,
        complexity: u8,
        estimated_tokens: usize,
        file_paths: Vec<String>,
        hard_deps: HashSet<TaskId>,
        soft_deps: HashSet<TaskId>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            workflow_id,
            title,
            description,
            acceptance_criteria: Vec::new(),
            complexity,
            estimated_tokens,
            file_paths,
            hard_deps,
            soft_deps,
            status: TaskStatus::Pending,
            assigned_agent: None,
            attempt_count: 0,
            last_result: None,
            model_tier: ModelTier::for_complexity(complexity),
            role,
            created_at: Utc::now(),
            ready_at: None,
        }
    }

    /// Dependency edges treated identically regardless of hard/soft (spec
    /// §9 Open Question #3, resolved in DESIGN.md).
    pub fn all_deps(&self) -> impl Iterator<Item = &TaskId> {
        self.hard_deps.iter().chain(self.soft_deps.iter())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub summary: String,
    pub cost: f64,
    pub artifacts: Vec<String>,
}

/// A role-specialized worker capability (spec §3 Agent). Long-lived;
/// created at process start from configuration, destroyed at shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub role: AgentRole,
    pub model_id: String,
    pub context_window: usize,
    pub max_tasks: u32,
    pub running_tasks: u32,
    pub lifetime_successes: u64,
    pub lifetime_failures: u64,
    /// Fairness bookkeeping: the round-robin cursor position at which this
    /// agent was last chosen, within its role's rotation (spec §3 Agent
    /// "last-assignment index").
    pub last_assignment_index: u64,
    pub recent_assignments: u64,
    pub total_assignments: u64,
    /// Filesystem/network/git scopes this agent may request from the
    /// sandbox executor (SPEC_FULL.md §3 Agent).
    pub capabilities: AgentCapabilities,
    pub quarantined_until: Option<DateTime<Utc>>,
    pub consecutive_stuck_events: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentCapabilities {
    pub filesystem_scopes: Vec<String>,
    pub network_scopes: Vec<String>,
    pub git_scopes: Vec<String>,
}

impl Agent {
    pub fn new(role: AgentRole, model_id: String, context_window: usize, max_tasks: u32) -> Self {
        Self {
            id: AgentId::new(),
            role,
            model_id,
            context_window,
            max_tasks,
            running_tasks: 0,
            lifetime_successes: 0,
            lifetime_failures: 0,
            last_assignment_index: 0,
            recent_assignments: 0,
            total_assignments: 0,
            capabilities: AgentCapabilities::default(),
            quarantined_until: None,
            consecutive_stuck_events: 0,
        }
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.lifetime_successes + self.lifetime_failures;
        if total == 0 {
            0.5
        } else {
            self.lifetime_successes as f64 / total as f64
        }
    }

    pub fn is_quarantined(&self, now: DateTime<Utc>) -> bool {
        self.quarantined_until.map(|until| until > now).unwrap_or(false)
    }
}
