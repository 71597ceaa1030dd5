//! Task graph, workflow state machine, agent assignment, self-correction
//! loop, and budget/health governors for the orchestration core.

pub mod assignment;
pub mod budget;
pub mod graph;
pub mod health;
pub mod model;
pub mod self_correction;
pub mod service;
pub mod workflow;

pub use assignment::{assign, default_agent_pool, upgrade_tier_after_failure, CandidateScore};
pub use budget::{BudgetGovernor, BudgetSignal};
pub use graph::TaskGraph;
pub use health::{HealthMonitor, Heartbeat, StuckTask};
pub use model::{
    Agent, AgentCapabilities, ApprovalRecord, Breakpoint, Project, Task, TaskResult, Workflow,
};
pub use self_correction::{AgentClient, GateFailure, Outcome, QualityScorer, SelfCorrectionLoop};
pub use service::{DashboardSnapshot, OrchestratorService};
pub use workflow::{phase_slug, rework_context, WorkflowCommand, WorkflowEvent, WorkflowStateMachine};
