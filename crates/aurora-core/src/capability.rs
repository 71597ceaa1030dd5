use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// The decision for one capability check: whether a sandboxed execution may
/// touch a given resource (spec §3 Agent `capabilities`, §4.6 Sandbox Policy
/// dimensions). Shared between `aurora-orchestrator` (which builds the
/// policy handed to a task) and `aurora-runtime` (which enforces it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityAction {
    Allow,
    Ask,
    Deny,
}

/// One scoping rule: "a request for `resource` matching `pattern` resolves
/// to `action`". Rules are evaluated last-match-wins, most specific rule set
/// added last.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRule {
    pub id: String,
    pub resource: String,
    pub pattern: String,
    pub action: CapabilityAction,
}

/// An agent's declared filesystem/network/git capability scopes (spec §3
/// Agent: "capabilities descriptor ... it is allowed to request from the
/// Sandbox Executor").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentCapabilities {
    pub filesystem_scopes: Vec<String>,
    pub network_scopes: Vec<String>,
    pub git_scopes: Vec<String>,
}

/// Registry of capability rules, evaluated by resource+pattern. Mirrors the
/// allow/ask/deny evaluation idiom used for interactive permission prompts,
/// generalized here to non-interactive sandbox policy resolution: an `Ask`
/// verdict at this layer means "only with an explicit capability grant on
/// the task", since the orchestration core has no interactive operator to
/// prompt mid-task.
#[derive(Clone)]
pub struct CapabilityRegistry {
    rules: Arc<RwLock<Vec<CapabilityRule>>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn add_rule(&self, rule: CapabilityRule) {
        self.rules.write().await.push(rule);
    }

    /// Resolves the rule set for a resource+pattern pair. With no matching
    /// rule, defaults to `Deny` (principle of least privilege for untrusted
    /// generated code).
    pub async fn evaluate(&self, resource: &str, pattern: &str) -> CapabilityAction {
        let rules = self.rules.read().await;
        rules
            .iter()
            .rev()
            .find(|rule| rule.resource == resource && wildcard_matches(&rule.pattern, pattern))
            .map(|rule| rule.action)
            .unwrap_or(CapabilityAction::Deny)
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn wildcard_matches(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return pattern == value;
    }
    let mut remaining = value;
    let mut is_first = true;
    for part in pattern.split('*') {
        if part.is_empty() {
            continue;
        }
        if is_first {
            match remaining.strip_prefix(part) {
                Some(stripped) => remaining = stripped,
                None => return false,
            }
            is_first = false;
            continue;
        }
        match remaining.find(part) {
            Some(idx) => remaining = &remaining[idx + part.len()..],
            None => return false,
        }
    }
    pattern.ends_with('*') || remaining.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unmatched_resource_defaults_to_deny() {
        let registry = CapabilityRegistry::new();
        assert_eq!(
            registry.evaluate("network", "registry.npmjs.org").await,
            CapabilityAction::Deny
        );
    }

    #[tokio::test]
    async fn later_rules_take_precedence_over_earlier_ones() {
        let registry = CapabilityRegistry::new();
        registry
            .add_rule(CapabilityRule {
                id: "r1".into(),
                resource: "network".into(),
                pattern: "*".into(),
                action: CapabilityAction::Deny,
            })
            .await;
        registry
            .add_rule(CapabilityRule {
                id: "r2".into(),
                resource: "network".into(),
                pattern: "registry.npmjs.org".into(),
                action: CapabilityAction::Allow,
            })
            .await;

        assert_eq!(
            registry.evaluate("network", "registry.npmjs.org").await,
            CapabilityAction::Allow
        );
        assert_eq!(
            registry.evaluate("network", "evil.example.com").await,
            CapabilityAction::Deny
        );
    }

    #[test]
    fn wildcard_prefix_match() {
        assert!(wildcard_matches("pip/*", "pip/install"));
        assert!(!wildcard_matches("pip/*", "npm/install"));
    }
}
