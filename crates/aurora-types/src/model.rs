use serde::{Deserialize, Serialize};

/// A reference to a provider-hosted model, as declared by an agent's config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    #[serde(alias = "providerID", alias = "providerId")]
    pub provider_id: String,
    #[serde(alias = "modelID", alias = "modelId")]
    pub model_id: String,
}

/// Resolved model metadata, including the context window used by the
/// assignment filter's 80%-of-limit check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider_id: String,
    pub display_name: String,
    pub context_window: usize,
    pub tier: ModelTier,
}

/// Complexity-routing tier (spec §4.3 Complexity routing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Cheap,
    Standard,
    Capable,
}

impl ModelTier {
    /// Complexity score <= 3 prefers cheap, >= 7 prefers capable, else standard.
    pub fn for_complexity(complexity: u8) -> Self {
        if complexity <= 3 {
            ModelTier::Cheap
        } else if complexity >= 7 {
            ModelTier::Capable
        } else {
            ModelTier::Standard
        }
    }

    /// The next tier up, used when the self-correction loop upgrades a task
    /// after a failed attempt on a lower tier.
    pub fn upgraded(self) -> Self {
        match self {
            ModelTier::Cheap => ModelTier::Standard,
            ModelTier::Standard => ModelTier::Capable,
            ModelTier::Capable => ModelTier::Capable,
        }
    }
}
