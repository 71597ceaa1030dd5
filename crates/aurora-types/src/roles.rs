use serde::{Deserialize, Serialize};

/// Role tag for a specialized agent worker (spec §3 Agent, §9 Design Notes:
/// "Dynamic dispatch -> tagged variants + capability interfaces").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Architect,
    Backend,
    Frontend,
    Database,
    Test,
    Security,
    Reviewer,
    Devops,
    Integration,
    Research,
    Documentation,
}

impl AgentRole {
    pub const ALL: [AgentRole; 11] = [
        AgentRole::Architect,
        AgentRole::Backend,
        AgentRole::Frontend,
        AgentRole::Database,
        AgentRole::Test,
        AgentRole::Security,
        AgentRole::Reviewer,
        AgentRole::Devops,
        AgentRole::Integration,
        AgentRole::Research,
        AgentRole::Documentation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Architect => "architect",
            AgentRole::Backend => "backend",
            AgentRole::Frontend => "frontend",
            AgentRole::Database => "database",
            AgentRole::Test => "test",
            AgentRole::Security => "security",
            AgentRole::Reviewer => "reviewer",
            AgentRole::Devops => "devops",
            AgentRole::Integration => "integration",
            AgentRole::Research => "research",
            AgentRole::Documentation => "documentation",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Execution mode for a project's workflow (spec §3 Project).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    Autonomous,
    Collaborative,
}

/// Workflow lifecycle phase (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Requirements,
    Design,
    Implementation,
    Testing,
    CodeReview,
    SecurityAudit,
    Documentation,
    Deployment,
    Monitoring,
    Completed,
}

impl Phase {
    /// The ordered, non-terminal lifecycle sequence (spec §4.2 States).
    pub const SEQUENCE: [Phase; 11] = [
        Phase::Idle,
        Phase::Requirements,
        Phase::Design,
        Phase::Implementation,
        Phase::Testing,
        Phase::CodeReview,
        Phase::SecurityAudit,
        Phase::Documentation,
        Phase::Deployment,
        Phase::Monitoring,
        Phase::Completed,
    ];

    pub fn next(self) -> Option<Phase> {
        let idx = Self::SEQUENCE.iter().position(|p| *p == self)?;
        Self::SEQUENCE.get(idx + 1).copied()
    }
}

/// Workflow status (spec §3 Workflow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Starting,
    Running,
    Paused,
    AwaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

/// Task status (spec §3 Task).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    /// Heartbeat timeout observed by the health monitor (spec §4.7).
    Stuck,
    /// No candidate agent's context window fits the task (spec §4.3).
    BlockedContext,
}
