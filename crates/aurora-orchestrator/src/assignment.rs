use aurora_types::{estimate_tokens, AgentRole, ModelTier};
use chrono::Utc;

use crate::model::{Agent, Task};

/// Scoring weights from spec §4.3 "Scoring" table.
const WEIGHT_SPECIALIZATION: f64 = 0.35;
const WEIGHT_WORKLOAD: f64 = 0.25;
const WEIGHT_SUCCESS_RATE: f64 = 0.20;
const WEIGHT_FAIRNESS: f64 = 0.10;
const WEIGHT_ROTATION: f64 = 0.10;

/// An agent scores 0 (and is excluded) once its estimated context usage
/// would exceed this fraction of its model's window (spec §4.3
/// "Context-window filter").
const CONTEXT_WINDOW_FRACTION: f64 = 0.8;

/// Per-candidate score breakdown, kept for observability and for tie-break
/// inspection in tests.
#[derive(Debug, Clone)]
pub struct CandidateScore {
    pub agent_id: aurora_types::AgentId,
    pub total: f64,
    pub excluded_context: bool,
}

/// Resolves one ready task to the agent that will execute it (spec §4.3
/// `assign`). Returns `None` when every candidate would exceed 80% of its
/// model's context limit — the caller marks the task `blocked_context` and
/// surfaces it for decomposition.
///
/// `aggregated_dependency_output_chars` approximates the concatenated
/// output of the task's already-succeeded dependencies, folded into the
/// context-window estimate alongside the task's own description and
/// acceptance criteria (spec §4.3 "Context-window filter").
pub fn assign(
    task: &Task,
    candidates: &[Agent],
    aggregated_dependency_output_chars: usize,
) -> Option<aurora_types::AgentId> {
    let estimate_text_len = task.description.len()
        + task.acceptance_criteria.iter().map(|c| c.len()).sum::<usize>()
        + aggregated_dependency_output_chars;
    let estimated_tokens = estimate_tokens(&"x".repeat(estimate_text_len));

    let now = Utc::now();
    let mut scored: Vec<(f64, &Agent)> = candidates
        .iter()
        .filter(|agent| !agent.is_quarantined(now))
        .map(|agent| {
            let fits_context =
                (estimated_tokens as f64) <= (agent.context_window as f64) * CONTEXT_WINDOW_FRACTION;
            let score = if fits_context {
                score_candidate(task, agent)
            } else {
                0.0
            };
            (score, agent)
        })
        .filter(|(score, _)| *score > 0.0)
        .collect();

    if scored.is_empty() {
        return None;
    }

    // Highest score wins; ties break by least-recently-assigned (spec §4.3
    // "pick the maximum; ties break by least-recently-assigned").
    scored.sort_by(|(score_a, agent_a), (score_b, agent_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| agent_a.last_assignment_index.cmp(&agent_b.last_assignment_index))
    });

    scored.first().map(|(_, agent)| agent.id.clone())
}

fn score_candidate(task: &Task, agent: &Agent) -> f64 {
    let specialization = if agent.role == task.role { 1.0 } else { 0.3 };

    let workload = if agent.max_tasks == 0 {
        0.0
    } else {
        1.0 - (agent.running_tasks as f64 / agent.max_tasks as f64)
    }
    .clamp(0.0, 1.0);

    let success_rate = agent.success_rate();

    let fairness = if agent.total_assignments == 0 {
        1.0
    } else {
        1.0 - (agent.recent_assignments as f64 / agent.total_assignments as f64)
    }
    .clamp(0.0, 1.0);

    // Expected round-robin agent is whichever candidate of this role has
    // gone longest without an assignment; approximated here by the caller
    // passing only true candidates and this function scoring the least
    // recently assigned of a matching role as the "expected" one.
    let rotation = if agent.role == task.role && agent.last_assignment_index == 0 {
        1.0
    } else {
        0.0
    };

    WEIGHT_SPECIALIZATION * specialization
        + WEIGHT_WORKLOAD * workload
        + WEIGHT_SUCCESS_RATE * success_rate
        + WEIGHT_FAIRNESS * fairness
        + WEIGHT_ROTATION * rotation
}

/// Complexity routing (spec §4.3 "Complexity routing"): already captured as
/// `ModelTier::for_complexity` on task creation; this helper exposes the
/// upgrade path the self-correction loop drives after a failed attempt.
pub fn upgrade_tier_after_failure(current: ModelTier) -> ModelTier {
    current.upgraded()
}

/// Convenience constructor used by the engine's startup agent pool
/// configuration and by tests.
pub fn default_agent_pool() -> Vec<Agent> {
    let tiers = [
        (AgentRole::Architect, "capable-planner", 128_000, 2u32),
        (AgentRole::Backend, "standard-coder", 64_000, 3),
        (AgentRole::Frontend, "standard-coder", 64_000, 3),
        (AgentRole::Database, "standard-coder", 64_000, 2),
        (AgentRole::Test, "standard-coder", 64_000, 3),
        (AgentRole::Security, "capable-reviewer", 128_000, 2),
        (AgentRole::Reviewer, "capable-reviewer", 128_000, 2),
        (AgentRole::Devops, "standard-coder", 64_000, 2),
        (AgentRole::Integration, "standard-coder", 64_000, 2),
        (AgentRole::Research, "cheap-researcher", 32_000, 2),
        (AgentRole::Documentation, "cheap-researcher", 32_000, 2),
    ];
    tiers
        .into_iter()
        .map(|(role, model, window, max_tasks)| {
            Agent::new(role, model.to_string(), window, max_tasks)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurora_types::WorkflowId;
    use std::collections::HashSet;

    fn task_with_role(role: AgentRole) -> Task {
        Task::new(
            WorkflowId::new(),
            "title".to_string(),
            "a small task".to_string(),
            role,
            5,
            100,
            Vec::new(),
            HashSet::new(),
            HashSet::new(),
        )
    }

    #[test]
    fn specialized_agent_outranks_generalist() {
        let task = task_with_role(AgentRole::Backend);
        let specialist = Agent::new(AgentRole::Backend, "m".to_string(), 64_000, 3);
        let mut generalist = Agent::new(AgentRole::Frontend, "m".to_string(), 64_000, 3);
        generalist.last_assignment_index = 5;
        let pool = vec![generalist, specialist.clone()];
        let chosen = assign(&task, &pool, 0).unwrap();
        assert_eq!(chosen, specialist.id);
    }

    #[test]
    fn oversized_task_returns_none_for_every_candidate() {
        let mut task = task_with_role(AgentRole::Backend);
        task.description = "x".repeat(1_000_000);
        let small_agent = Agent::new(AgentRole::Backend, "m".to_string(), 1_000, 3);
        let pool = vec![small_agent];
        assert!(assign(&task, &pool, 0).is_none());
    }

    #[test]
    fn quarantined_agent_is_excluded() {
        let task = task_with_role(AgentRole::Backend);
        let mut quarantined = Agent::new(AgentRole::Backend, "m".to_string(), 64_000, 3);
        quarantined.quarantined_until = Some(Utc::now() + chrono::Duration::minutes(5));
        let pool = vec![quarantined];
        assert!(assign(&task, &pool, 0).is_none());
    }

    #[test]
    fn ties_break_by_least_recently_assigned() {
        let task = task_with_role(AgentRole::Backend);
        let mut a = Agent::new(AgentRole::Backend, "m".to_string(), 64_000, 3);
        a.last_assignment_index = 10;
        let mut b = Agent::new(AgentRole::Backend, "m".to_string(), 64_000, 3);
        b.last_assignment_index = 2;
        let pool = vec![a, b.clone()];
        let chosen = assign(&task, &pool, 0).unwrap();
        assert_eq!(chosen, b.id);
    }
}
