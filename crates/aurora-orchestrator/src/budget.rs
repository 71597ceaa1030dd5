use std::collections::HashMap;
use std::sync::Mutex;

use aurora_types::{AgentId, WorkflowId};

/// Fraction of the daily cap at which execution is allowed to continue but
/// an alert is raised (spec §4.7 Budget "At 80% an alert event is emitted
/// but execution continues").
pub const ALERT_THRESHOLD: f64 = 0.8;

/// Fraction of the daily cap at which all affected workflows are paused
/// (spec §4.7 Budget "when total daily cost crosses 95% of cap").
pub const EXHAUST_THRESHOLD: f64 = 0.95;

/// Outcome of a `BudgetGovernor::record_usage` call: whether the caller
/// must now raise an alert or pause the workflows it tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetSignal {
    Ok,
    Alert,
    Exhausted,
}

#[derive(Debug, Default)]
struct BudgetState {
    /// Cost already settled via `record_usage`.
    spent: f64,
    /// Cost reserved by `can_proceed` calls not yet settled or released.
    reserved: f64,
}

/// Shared singleton consulted by every LLM call and sandbox call before it
/// runs (spec §4.7 Budget). Mirrors the reference `Budget`/`usage_percentage`
/// shape from the agent-team spawn policy, generalized from a per-spawn
/// token ceiling to a project-wide daily cost cap with an atomic
/// compare-and-set reservation (spec §5 "the budget ledger: atomic
/// increments over a single counter; `can_proceed` + reservation is an
/// atomic compare-and-set").
pub struct BudgetGovernor {
    daily_cap: f64,
    global_cap: f64,
    per_project: Mutex<HashMap<String, BudgetState>>,
    global: Mutex<BudgetState>,
}

impl BudgetGovernor {
    pub fn new(daily_cap: f64, global_cap: f64) -> Self {
        Self {
            daily_cap,
            global_cap,
            per_project: Mutex::new(HashMap::new()),
            global: Mutex::new(BudgetState::default()),
        }
    }

    /// Returns false (reserving nothing) if either the project's daily cap
    /// or the global cap would be exceeded by `estimated_cost` (spec §4.7
    /// `can_proceed`). `agent_id` is accepted for the call-site shape the
    /// spec names but is not itself rate-limited; budget is tracked per
    /// project and globally.
    pub fn can_proceed(&self, project_id: &str, _agent_id: &AgentId, estimated_cost: f64) -> bool {
        let mut projects = self.per_project.lock().expect("budget project lock poisoned");
        let mut global = self.global.lock().expect("budget global lock poisoned");

        let project = projects.entry(project_id.to_string()).or_default();
        let project_committed = project.spent + project.reserved + estimated_cost;
        let global_committed = global.spent + global.reserved + estimated_cost;

        if project_committed > self.daily_cap || global_committed > self.global_cap {
            return false;
        }

        project.reserved += estimated_cost;
        global.reserved += estimated_cost;
        true
    }

    /// Settles a reservation: moves `actual_cost` from reserved to spent.
    /// If `actual_cost` differs from the amount estimated by the matching
    /// `can_proceed` call, the reservation is simply cleared to zero rather
    /// than going negative (spec §4.7 `record_usage` "settles the
    /// reservation").
    pub fn record_usage(&self, project_id: &str, reserved_estimate: f64, actual_cost: f64) -> BudgetSignal {
        let mut projects = self.per_project.lock().expect("budget project lock poisoned");
        let mut global = self.global.lock().expect("budget global lock poisoned");

        let project = projects.entry(project_id.to_string()).or_default();
        project.reserved = (project.reserved - reserved_estimate).max(0.0);
        project.spent += actual_cost;
        global.reserved = (global.reserved - reserved_estimate).max(0.0);
        global.spent += actual_cost;

        let usage = (project.spent / self.daily_cap).max(global.spent / self.global_cap);
        self.signal_for_usage(usage)
    }

    fn signal_for_usage(&self, usage: f64) -> BudgetSignal {
        if usage >= EXHAUST_THRESHOLD {
            BudgetSignal::Exhausted
        } else if usage >= ALERT_THRESHOLD {
            BudgetSignal::Alert
        } else {
            BudgetSignal::Ok
        }
    }

    /// Current usage fraction for a project, for dashboard reporting (spec
    /// §6 `DashboardStats`).
    pub fn usage_fraction(&self, project_id: &str) -> f64 {
        let projects = self.per_project.lock().expect("budget project lock poisoned");
        projects
            .get(project_id)
            .map(|s| s.spent / self.daily_cap)
            .unwrap_or(0.0)
    }
}

/// Builds the `budget_exceeded` reason string the workflow state machine's
/// `WorkflowEvent::BudgetExhausted` matches on (spec §4.2 Transitions).
pub fn exhausted_reason(project_id: &str) -> String {
    format!("budget_exceeded: daily cap reached for project {project_id}")
}

/// The set of workflows a budget-exhaustion signal must pause; the caller
/// is expected to have indexed its running workflows by project so this is
/// a plain lookup rather than governor state.
pub fn affected_workflows(project_id: &str, running: &[(WorkflowId, String)]) -> Vec<WorkflowId> {
    running
        .iter()
        .filter(|(_, p)| p == project_id)
        .map(|(id, _)| id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserves_and_settles_within_cap() {
        let gov = BudgetGovernor::new(100.0, 1000.0);
        assert!(gov.can_proceed("proj-1", &AgentId::new(), 10.0));
        let signal = gov.record_usage("proj-1", 10.0, 8.0);
        assert_eq!(signal, BudgetSignal::Ok);
        assert!((gov.usage_fraction("proj-1") - 0.08).abs() < 1e-9);
    }

    #[test]
    fn refuses_when_daily_cap_would_be_exceeded() {
        let gov = BudgetGovernor::new(50.0, 1000.0);
        assert!(gov.can_proceed("proj-1", &AgentId::new(), 40.0));
        assert!(!gov.can_proceed("proj-1", &AgentId::new(), 20.0));
    }

    #[test]
    fn refuses_when_global_cap_would_be_exceeded() {
        let gov = BudgetGovernor::new(1000.0, 30.0);
        assert!(gov.can_proceed("proj-1", &AgentId::new(), 20.0));
        assert!(!gov.can_proceed("proj-2", &AgentId::new(), 20.0));
    }

    #[test]
    fn crossing_95_percent_signals_exhausted() {
        let gov = BudgetGovernor::new(100.0, 1000.0);
        assert!(gov.can_proceed("proj-1", &AgentId::new(), 96.0));
        let signal = gov.record_usage("proj-1", 96.0, 96.0);
        assert_eq!(signal, BudgetSignal::Exhausted);
    }

    #[test]
    fn crossing_80_percent_signals_alert_only() {
        let gov = BudgetGovernor::new(100.0, 1000.0);
        assert!(gov.can_proceed("proj-1", &AgentId::new(), 85.0));
        let signal = gov.record_usage("proj-1", 85.0, 85.0);
        assert_eq!(signal, BudgetSignal::Alert);
    }
}
