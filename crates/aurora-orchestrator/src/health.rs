use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use aurora_types::TaskId;

use crate::model::Agent;

/// Heartbeat loop period (spec §4.7 Health monitor "fixed interval, default
/// 30s").
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A `running` task with no heartbeat for longer than this is marked
/// `stuck` (spec §4.7 Health monitor).
pub const STUCK_THRESHOLD: chrono::Duration = chrono::Duration::minutes(15);

/// Consecutive `stuck` events on the same agent before quarantine fires
/// (spec §4.7 Health monitor).
pub const QUARANTINE_AFTER_CONSECUTIVE_STUCK: u32 = 3;

/// Quarantine duration once the threshold above is crossed.
pub const QUARANTINE_DURATION: chrono::Duration = chrono::Duration::minutes(10);

/// One running task's last-seen heartbeat, tracked by the orchestrator
/// service and fed into `sweep` on each tick.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    pub task_id: TaskId,
    pub agent_id: aurora_types::AgentId,
    pub last_seen: DateTime<Utc>,
}

/// What the caller must do with a task found stuck during a sweep: cancel
/// and reschedule it (bumping its attempt counter), and possibly quarantine
/// the agent that was running it (spec §4.7 Health monitor).
#[derive(Debug, Clone)]
pub struct StuckTask {
    pub task_id: TaskId,
    pub agent_id: aurora_types::AgentId,
    pub quarantine: bool,
}

/// Pure sweep over a heartbeat table: no I/O, no clock reads beyond `now`,
/// so it is fully unit-testable without a real timer (spec §4.7 Health
/// monitor, generalized from the reference SSE keep-alive ticker shape in
/// the teacher's session-touch loop).
pub struct HealthMonitor {
    /// Per-agent run of consecutive stuck events, reset to zero on any
    /// heartbeat activity that is not stuck.
    consecutive_stuck: HashMap<aurora_types::AgentId, u32>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            consecutive_stuck: HashMap::new(),
        }
    }

    /// Examines every tracked heartbeat, returning the tasks now stuck.
    /// Agents seen in `heartbeats` but not flagged this round have their
    /// consecutive-stuck counter reset, mirroring the model's
    /// `consecutive_stuck_events` field resetting once an agent is healthy
    /// again.
    pub fn sweep(&mut self, heartbeats: &[Heartbeat], now: DateTime<Utc>) -> Vec<StuckTask> {
        let mut stuck = Vec::new();
        let mut seen_agents = std::collections::HashSet::new();

        for hb in heartbeats {
            seen_agents.insert(hb.agent_id.clone());
            if now - hb.last_seen > STUCK_THRESHOLD {
                let count = self
                    .consecutive_stuck
                    .entry(hb.agent_id.clone())
                    .and_modify(|c| *c += 1)
                    .or_insert(1);
                let quarantine = *count >= QUARANTINE_AFTER_CONSECUTIVE_STUCK;
                if quarantine {
                    self.consecutive_stuck.insert(hb.agent_id.clone(), 0);
                }
                stuck.push(StuckTask {
                    task_id: hb.task_id.clone(),
                    agent_id: hb.agent_id.clone(),
                    quarantine,
                });
            } else {
                self.consecutive_stuck.insert(hb.agent_id.clone(), 0);
            }
        }

        stuck
    }

    /// Applies a sweep's findings to the agent pool: increments
    /// `consecutive_stuck_events` and sets `quarantined_until` where the
    /// sweep requested it. Kept separate from `sweep` so tests can assert
    /// on the stuck list before mutating agent state.
    pub fn apply(&self, stuck: &[StuckTask], agents: &mut [Agent], now: DateTime<Utc>) {
        for s in stuck {
            if let Some(agent) = agents.iter_mut().find(|a| a.id == s.agent_id) {
                agent.consecutive_stuck_events += 1;
                if s.quarantine {
                    agent.quarantined_until = Some(now + QUARANTINE_DURATION);
                    agent.consecutive_stuck_events = 0;
                }
            }
        }
    }
}

/// Drives `HealthMonitor::sweep` on a fixed tick, forwarding stuck tasks to
/// `on_stuck`. Spawned once at startup per the spec's "runs a heartbeat
/// loop at a fixed interval" (spec §4.7); separated from `HealthMonitor`
/// itself so the sweep logic stays synchronous and testable.
pub async fn run_heartbeat_loop<F>(
    mut monitor: HealthMonitor,
    heartbeats: std::sync::Arc<tokio::sync::Mutex<Vec<Heartbeat>>>,
    cancel: aurora_core::cancellation::CancelContext,
    mut on_stuck: F,
) where
    F: FnMut(Vec<StuckTask>) + Send,
{
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = heartbeats.lock().await.clone();
                let stuck = monitor.sweep(&snapshot, Utc::now());
                if !stuck.is_empty() {
                    on_stuck(stuck);
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!(target: "aurora.orchestrator", "health monitor loop cancelled");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurora_types::AgentId;

    fn hb(agent: &AgentId, task: TaskId, minutes_ago: i64, now: DateTime<Utc>) -> Heartbeat {
        Heartbeat {
            task_id: task,
            agent_id: agent.clone(),
            last_seen: now - chrono::Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn marks_task_stuck_past_15_minutes() {
        let mut monitor = HealthMonitor::new();
        let now = Utc::now();
        let agent = AgentId::new();
        let heartbeats = vec![hb(&agent, TaskId::new(), 20, now)];
        let stuck = monitor.sweep(&heartbeats, now);
        assert_eq!(stuck.len(), 1);
        assert!(!stuck[0].quarantine);
    }

    #[test]
    fn fresh_heartbeat_is_not_stuck() {
        let mut monitor = HealthMonitor::new();
        let now = Utc::now();
        let agent = AgentId::new();
        let heartbeats = vec![hb(&agent, TaskId::new(), 5, now)];
        assert!(monitor.sweep(&heartbeats, now).is_empty());
    }

    #[test]
    fn three_consecutive_stuck_events_trigger_quarantine() {
        let mut monitor = HealthMonitor::new();
        let now = Utc::now();
        let agent = AgentId::new();
        let task = TaskId::new();

        for i in 0..2 {
            let heartbeats = vec![hb(&agent, task.clone(), 20 + i, now)];
            let stuck = monitor.sweep(&heartbeats, now);
            assert!(!stuck[0].quarantine, "round {i} should not quarantine yet");
        }
        let heartbeats = vec![hb(&agent, task, 25, now)];
        let stuck = monitor.sweep(&heartbeats, now);
        assert!(stuck[0].quarantine);
    }

    #[test]
    fn apply_sets_quarantine_on_matching_agent() {
        let monitor = HealthMonitor::new();
        let now = Utc::now();
        let mut agent = Agent::new(aurora_types::AgentRole::Backend, "m".to_string(), 1000, 1);
        let stuck = vec![StuckTask {
            task_id: TaskId::new(),
            agent_id: agent.id.clone(),
            quarantine: true,
        }];
        let mut agents = vec![agent.clone()];
        monitor.apply(&stuck, &mut agents, now);
        agent = agents.into_iter().next().unwrap();
        assert!(agent.is_quarantined(now));
        assert_eq!(agent.consecutive_stuck_events, 0);
    }
}
