use serde::Serialize;
use thiserror::Error;

/// The stable error kinds carried across every API boundary (spec §7).
///
/// Never put a raw stack trace behind this boundary: every occurrence is
/// serialized as a `{kind, message, context}` triple.
#[derive(Debug, Clone, Error)]
pub enum AuroraErrorKind {
    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("context too large: {0}")]
    ContextTooLarge(String),

    #[error("task exhausted: {0}")]
    TaskExhausted(String),

    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    #[error("dependency failed: {0}")]
    DependencyFailed(String),

    #[error("cycle detected: {0}")]
    CycleDetected(String),

    #[error("stuck agent: {0}")]
    StuckAgent(String),

    #[error("consensus required: {0}")]
    ConsensusRequired(String),

    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl AuroraErrorKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            AuroraErrorKind::ValidationError(_) => "ValidationError",
            AuroraErrorKind::BudgetExceeded(_) => "BudgetExceeded",
            AuroraErrorKind::ContextTooLarge(_) => "ContextTooLarge",
            AuroraErrorKind::TaskExhausted(_) => "TaskExhausted",
            AuroraErrorKind::SandboxUnavailable(_) => "SandboxUnavailable",
            AuroraErrorKind::DependencyFailed(_) => "DependencyFailed",
            AuroraErrorKind::CycleDetected(_) => "CycleDetected",
            AuroraErrorKind::StuckAgent(_) => "StuckAgent",
            AuroraErrorKind::ConsensusRequired(_) => "ConsensusRequired",
            AuroraErrorKind::Cancelled(_) => "Cancelled",
        }
    }

    pub fn message(&self) -> String {
        match self {
            AuroraErrorKind::ValidationError(m)
            | AuroraErrorKind::BudgetExceeded(m)
            | AuroraErrorKind::ContextTooLarge(m)
            | AuroraErrorKind::TaskExhausted(m)
            | AuroraErrorKind::SandboxUnavailable(m)
            | AuroraErrorKind::DependencyFailed(m)
            | AuroraErrorKind::CycleDetected(m)
            | AuroraErrorKind::StuckAgent(m)
            | AuroraErrorKind::ConsensusRequired(m)
            | AuroraErrorKind::Cancelled(m) => m.clone(),
        }
    }

    /// Whether this error is surfaced to the end user directly, vs. recovered
    /// locally or surfaced only to the workflow (spec §7 Propagation policy).
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            AuroraErrorKind::BudgetExceeded(_) | AuroraErrorKind::Cancelled(_)
        )
    }
}

/// Wire shape for an error crossing the API boundary: `{kind, message, context}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl From<&AuroraErrorKind> for ErrorEnvelope {
    fn from(err: &AuroraErrorKind) -> Self {
        ErrorEnvelope {
            kind: err.kind_name(),
            message: err.message(),
            context: None,
        }
    }
}

impl Serialize for AuroraErrorKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        ErrorEnvelope::from(self).serialize(serializer)
    }
}
