use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use aurora_core::cancellation::CancelContext;
use aurora_core::event_bus::EventBus;
use aurora_core::store::DurableStore;
use aurora_memory::MemoryManager;
use aurora_runtime::{LocalProcessBackend, SandboxExecutor};
use aurora_wire::{WorkflowEvent, WorkflowEventData};
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use aurora_types::{
    AgentId, AgentRole, AuroraErrorKind, Phase, ProjectId, TaskId, TaskStatus, WorkflowId,
    WorkflowMode, WorkflowStatus,
};

use crate::assignment::{self, default_agent_pool};
use crate::budget::{exhausted_reason, BudgetGovernor, BudgetSignal};
use crate::graph::TaskGraph;
use crate::health::{run_heartbeat_loop, Heartbeat, HealthMonitor, StuckTask};
use crate::model::{Agent, ApprovalRecord, Project, Task, TaskResult, Workflow};
use crate::self_correction::{AgentClient, DefaultAgentClient, QualityScorer, SelfCorrectionLoop};
use crate::workflow::{phase_slug, WorkflowCommand, WorkflowEvent as WfEvent, WorkflowStateMachine};

/// Rough per-task cost estimate used to reserve budget before a task runs
/// and to settle it afterward (spec §4.7 Budget). A real deployment would
/// derive this from the assigned model tier's price; this core tracks only
/// the ledger mechanics, not pricing (spec §1 Non-goals).
const ESTIMATED_TASK_COST: f64 = 1.0;

/// How often the scheduler loop re-scans every running workflow's task
/// graph for newly-ready work (spec §5 Scheduling model: "a worker pool
/// with a configurable cap" driven off `claim_next_ready`).
const SCHEDULER_TICK_INTERVAL: std::time::Duration = std::time::Duration::from_millis(200);

/// Ties the task graph, workflow state machine, agent pool, budget
/// governor, durable store and event bus into the single object the HTTP
/// layer drives (spec §2 Control flow). Task graphs live keyed by workflow
/// in `graphs`; `run_scheduler_loop` is the background driver that claims
/// ready tasks from them, resolves an agent via `assignment::assign`, runs
/// them through `SelfCorrectionLoop`, and folds the result back into the
/// workflow state machine via `apply_event`.
pub struct OrchestratorService {
    store: Arc<DurableStore>,
    event_bus: EventBus,
    pub budget: BudgetGovernor,
    projects: RwLock<HashMap<String, Project>>,
    workflows: RwLock<HashMap<String, Workflow>>,
    graphs: RwLock<HashMap<String, TaskGraph>>,
    agents: RwLock<Vec<Agent>>,
    memory: MemoryManager,
    sandbox: SandboxExecutor,
    agent_client: Arc<dyn AgentClient>,
    worktrees_root: PathBuf,
    /// Last-seen heartbeat per currently-running task, swept by
    /// `run_health_monitor_loop` (spec §4.7 Health monitor).
    heartbeats: Arc<Mutex<Vec<Heartbeat>>>,
    /// Reverse lookup from a running task back to its workflow, so a stuck
    /// task found by the health monitor can be rescheduled in the right
    /// graph.
    running_task_workflow: Arc<Mutex<HashMap<TaskId, String>>>,
    assignment_counter: AtomicU64,
}

impl OrchestratorService {
    pub fn new(store: Arc<DurableStore>, event_bus: EventBus, budget: BudgetGovernor) -> Self {
        let worktrees_root = store.base_dir().join("_worktrees");
        Self {
            memory: MemoryManager::new(store.clone()),
            sandbox: SandboxExecutor::new(Arc::new(LocalProcessBackend::new())),
            store,
            event_bus,
            budget,
            projects: RwLock::new(HashMap::new()),
            workflows: RwLock::new(HashMap::new()),
            graphs: RwLock::new(HashMap::new()),
            agents: RwLock::new(default_agent_pool()),
            agent_client: Arc::new(DefaultAgentClient),
            worktrees_root,
            heartbeats: Arc::new(Mutex::new(Vec::new())),
            running_task_workflow: Arc::new(Mutex::new(HashMap::new())),
            assignment_counter: AtomicU64::new(0),
        }
    }

    /// Swaps in a real LLM-backed `AgentClient` in place of the default
    /// placeholder (spec §4.4: LLM API transport is out of scope for this
    /// crate, but the seam is here for a caller to plug one in).
    pub fn with_agent_client(mut self, agent_client: Arc<dyn AgentClient>) -> Self {
        self.agent_client = agent_client;
        self
    }

    /// Reloads every previously persisted workflow snapshot at startup
    /// (spec §4.8: "a workflow that was awaiting_approval or paused can be
    /// reinstantiated from disk after a process restart").
    pub async fn load_from_disk(&self) -> Result<(), AuroraErrorKind> {
        self.memory
            .load()
            .await
            .map_err(|e| AuroraErrorKind::ValidationError(e.to_string()))?;

        let ids = self
            .store
            .list_workflows()
            .map_err(|e| AuroraErrorKind::ValidationError(e.to_string()))?;
        let mut workflows = self.workflows.write().await;
        for id in ids {
            if let Some(wf) = self
                .store
                .load_snapshot::<Workflow>(&id)
                .map_err(|e| AuroraErrorKind::ValidationError(e.to_string()))?
            {
                workflows.insert(id, wf);
            }
        }
        Ok(())
    }

    pub async fn start_workflow(
        &self,
        project_id: &str,
        mode: WorkflowMode,
        description: String,
    ) -> Result<Workflow, AuroraErrorKind> {
        let project = {
            let mut projects = self.projects.write().await;
            projects
                .entry(project_id.to_string())
                .or_insert_with(|| {
                    Project::new(ProjectId::from(project_id), description.clone(), mode, 1_000.0)
                })
                .clone()
        };

        if !self.budget.can_proceed(project_id, &AgentId::new(), 0.0) {
            return Err(AuroraErrorKind::BudgetExceeded(exhausted_reason(project_id)));
        }

        let mut workflow = WorkflowStateMachine::init(&project);
        workflow.status = WorkflowStatus::Running;
        workflow.phase = Phase::Requirements;

        self.graphs.write().await.insert(workflow.id.0.clone(), TaskGraph::new());
        self.enqueue_phase_tasks(&workflow, &project, Phase::Requirements).await;
        self.persist_and_broadcast(&workflow, vec![WorkflowCommand::Persist]).await?;
        self.workflows.write().await.insert(workflow.id.0.clone(), workflow.clone());
        Ok(workflow)
    }

    pub async fn get_state(&self, workflow_id: &str) -> Option<Workflow> {
        self.workflows.read().await.get(workflow_id).cloned()
    }

    pub async fn pending_approvals(&self, project_id: Option<&str>) -> Vec<Workflow> {
        self.workflows
            .read()
            .await
            .values()
            .filter(|wf| wf.status == WorkflowStatus::AwaitingApproval)
            .filter(|wf| project_id.map(|p| wf.project_id.0 == p).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Resolves a breakpoint. Idempotent on repeat calls with the same
    /// `approval_id` (spec §8 "approving the same approval_id twice is a
    /// no-op").
    pub async fn resolve_approval(
        &self,
        workflow_id: &str,
        approved: bool,
        reviewer_id: String,
        comments: Option<String>,
        modifications: Option<serde_json::Value>,
    ) -> Result<Workflow, AuroraErrorKind> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| AuroraErrorKind::ValidationError(format!("unknown workflow {workflow_id}")))?;

        let record = ApprovalRecord {
            approval_id: aurora_types::ApprovalId::new(),
            approved,
            reviewer_id,
            comments,
            modifications,
            decided_at: Utc::now(),
        };

        let (next, commands) = WorkflowStateMachine::reduce(workflow, WfEvent::Approval(record));
        *workflow = next.clone();
        drop(workflows);
        self.persist_and_broadcast(&next, commands).await?;
        Ok(next)
    }

    pub async fn pause(&self, workflow_id: &str, reason: String) -> Result<Workflow, AuroraErrorKind> {
        self.apply_event(workflow_id, WfEvent::ManualPause { reason }).await
    }

    pub async fn resume(&self, workflow_id: &str) -> Result<Workflow, AuroraErrorKind> {
        self.apply_event(workflow_id, WfEvent::ManualResume).await
    }

    pub async fn cancel(&self, workflow_id: &str) -> Result<Workflow, AuroraErrorKind> {
        self.apply_event(workflow_id, WfEvent::Cancel).await
    }

    /// Settles budget usage for one agent call and, if it crosses the
    /// exhaustion threshold, pauses every running workflow of the project
    /// (spec §4.7 `pause_on_exhaust`).
    pub async fn record_usage(
        &self,
        project_id: &str,
        reserved_estimate: f64,
        actual_cost: f64,
    ) -> Result<(), AuroraErrorKind> {
        let signal = self.budget.record_usage(project_id, reserved_estimate, actual_cost);
        if signal == BudgetSignal::Exhausted {
            let affected: Vec<String> = self
                .workflows
                .read()
                .await
                .values()
                .filter(|wf| wf.project_id.0 == project_id)
                .map(|wf| wf.id.0.clone())
                .collect();
            for id in affected {
                self.apply_event(
                    &id,
                    WfEvent::BudgetExhausted {
                        reason: exhausted_reason(project_id),
                    },
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn apply_event(&self, workflow_id: &str, event: WfEvent) -> Result<Workflow, AuroraErrorKind> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| AuroraErrorKind::ValidationError(format!("unknown workflow {workflow_id}")))?;
        let (next, commands) = WorkflowStateMachine::reduce(workflow, event);
        *workflow = next.clone();
        drop(workflows);
        self.persist_and_broadcast(&next, commands).await?;
        Ok(next)
    }

    async fn persist_and_broadcast(
        &self,
        workflow: &Workflow,
        commands: Vec<WorkflowCommand>,
    ) -> Result<(), AuroraErrorKind> {
        for command in commands {
            match command {
                WorkflowCommand::Persist => {
                    self.store
                        .save_snapshot(&workflow.id.0, workflow)
                        .map_err(|e| AuroraErrorKind::ValidationError(e.to_string()))?;
                    self.store
                        .append_event(&workflow.id.0, &serde_json::json!({
                            "revision": workflow.revision,
                            "phase": phase_slug(workflow.phase),
                            "status": workflow.status,
                            "timestamp": Utc::now(),
                        }))
                        .map_err(|e| AuroraErrorKind::ValidationError(e.to_string()))?;
                    self.event_bus
                        .publish(WorkflowEvent::StateChange {
                            workflow_id: workflow.id.0.clone(),
                            data: WorkflowEventData {
                                phase: Some(workflow.phase),
                                timestamp: Utc::now(),
                                ..Default::default()
                            },
                        })
                        .await;
                }
                WorkflowCommand::EmitTasksForPhase { phase } => {
                    let project = self.projects.read().await.get(&workflow.project_id.0).cloned();
                    if let Some(project) = project {
                        self.enqueue_phase_tasks(workflow, &project, phase).await;
                    } else {
                        tracing::warn!(
                            target: "aurora.orchestrator",
                            workflow_id = %workflow.id,
                            phase = phase_slug(phase),
                            "cannot enqueue phase tasks: project not found"
                        );
                    }
                }
                WorkflowCommand::BroadcastApprovalRequired { breakpoint } => {
                    self.event_bus
                        .publish(WorkflowEvent::ApprovalRequired {
                            workflow_id: workflow.id.0.clone(),
                            data: WorkflowEventData {
                                phase: Some(workflow.phase),
                                message: Some(breakpoint.reason.clone()),
                                timestamp: Utc::now(),
                                ..Default::default()
                            },
                        })
                        .await;
                }
                WorkflowCommand::BroadcastTaskComplete { message } => {
                    self.event_bus
                        .publish(WorkflowEvent::TaskComplete {
                            workflow_id: workflow.id.0.clone(),
                            data: WorkflowEventData {
                                phase: Some(workflow.phase),
                                message: Some(message),
                                timestamp: Utc::now(),
                                ..Default::default()
                            },
                        })
                        .await;
                }
                WorkflowCommand::BroadcastError { message } => {
                    self.event_bus
                        .publish(WorkflowEvent::Error {
                            workflow_id: workflow.id.0.clone(),
                            data: WorkflowEventData {
                                phase: Some(workflow.phase),
                                message: Some(message),
                                timestamp: Utc::now(),
                                ..Default::default()
                            },
                        })
                        .await;
                }
            }
        }
        Ok(())
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Maps a lifecycle phase onto the task(s) it emits into the workflow's
    /// task graph (spec §2 Control flow: "each phase emits one or more
    /// tasks into the Task Graph"). `Idle`/`Completed` emit nothing.
    fn tasks_for_phase(workflow: &Workflow, project: &Project, phase: Phase) -> Vec<Task> {
        let role = match phase {
            Phase::Requirements => AgentRole::Research,
            Phase::Design => AgentRole::Architect,
            Phase::Implementation => AgentRole::Backend,
            Phase::Testing => AgentRole::Test,
            Phase::CodeReview => AgentRole::Reviewer,
            Phase::SecurityAudit => AgentRole::Security,
            Phase::Documentation => AgentRole::Documentation,
            Phase::Deployment | Phase::Monitoring => AgentRole::Devops,
            Phase::Idle | Phase::Completed => return Vec::new(),
        };

        let slug = phase_slug(phase);
        vec![Task::new(
            workflow.id.clone(),
            format!("{slug} for {}", project.description),
            format!("Complete the {slug} phase for: {}", project.description),
            role,
            5,
            1_500,
            Vec::new(),
            std::collections::HashSet::new(),
            std::collections::HashSet::new(),
        )]
    }

    async fn enqueue_phase_tasks(&self, workflow: &Workflow, project: &Project, phase: Phase) {
        let tasks = Self::tasks_for_phase(workflow, project, phase);
        if tasks.is_empty() {
            return;
        }
        let mut graphs = self.graphs.write().await;
        let graph = graphs.entry(workflow.id.0.clone()).or_insert_with(TaskGraph::new);
        for task in tasks {
            if let Err(err) = graph.add_task(task) {
                tracing::error!(
                    target: "aurora.orchestrator",
                    workflow_id = %workflow.id,
                    %err,
                    "failed to enqueue phase task"
                );
            }
        }
    }

    /// Background driver (spec §2 Control flow; spec §5 Scheduling model).
    /// Ticks every running workflow, claiming and executing ready tasks
    /// until its graph is exhausted, then folding `PhaseCompleted` back
    /// through the workflow reducer. Spawned once at process startup
    /// alongside the health monitor loop.
    pub async fn run_scheduler_loop(self: Arc<Self>, cancel: CancelContext) {
        let mut ticker = tokio::time::interval(SCHEDULER_TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.scheduler_tick().await,
                _ = cancel.cancelled() => {
                    tracing::info!(target: "aurora.orchestrator", "scheduler loop cancelled");
                    break;
                }
            }
        }
    }

    /// One scan-and-dispatch pass over every `running` workflow. Exposed
    /// (not just used by `run_scheduler_loop`) so tests can drive a
    /// workflow deterministically, one step at a time.
    pub async fn scheduler_tick(&self) {
        let running_ids: Vec<String> = self
            .workflows
            .read()
            .await
            .values()
            .filter(|wf| wf.status == WorkflowStatus::Running)
            .map(|wf| wf.id.0.clone())
            .collect();

        for workflow_id in running_ids {
            self.tick_workflow(&workflow_id).await;
        }
    }

    async fn tick_workflow(&self, workflow_id: &str) {
        let claimed = {
            let mut graphs = self.graphs.write().await;
            graphs.get_mut(workflow_id).and_then(|g| g.claim_next_ready())
        };

        match claimed {
            Some(task_id) => self.execute_task(workflow_id, &task_id).await,
            None => {
                let done = {
                    let graphs = self.graphs.read().await;
                    graphs.get(workflow_id).map(|g| g.all_completed()).unwrap_or(false)
                };
                if done {
                    let _ = self.apply_event(workflow_id, WfEvent::PhaseCompleted).await;
                }
            }
        }
    }

    /// Runs one claimed task through assignment and self-correction, then
    /// folds the outcome back into the task graph and, where the spec calls
    /// for it, back into the workflow state machine (spec §2 Control flow,
    /// §4.3 Assignment, §4.4 Self-correction).
    async fn execute_task(&self, workflow_id: &str, task_id: &TaskId) {
        let Some(task) = self.graphs.read().await.get(workflow_id).and_then(|g| g.get(task_id).cloned()) else {
            return;
        };
        let Some(project_id) = self.workflows.read().await.get(workflow_id).map(|wf| wf.project_id.0.clone()) else {
            return;
        };

        let candidates = self.agents.read().await.clone();
        let Some(agent_id) = assignment::assign(&task, &candidates, 0) else {
            // No candidate agent's context window fits the task (spec §4.3,
            // §8 boundary behavior): the task terminates immediately and is
            // surfaced for human decomposition.
            if let Some(graph) = self.graphs.write().await.get_mut(workflow_id) {
                graph.fail(task_id, false);
            }
            let _ = self
                .apply_event(
                    workflow_id,
                    WfEvent::QualityGateFailed {
                        reason: format!(
                            "context_too_large: task {task_id} exceeds every candidate agent's context window"
                        ),
                    },
                )
                .await;
            return;
        };

        if !self.budget.can_proceed(&project_id, &agent_id, ESTIMATED_TASK_COST) {
            // Budget blocked: hand the task back without burning a retry
            // attempt or cascading cancellation (spec §8: an approved
            // workflow whose next task would exceed the cap "transitions
            // directly to paused ... without running the task").
            if let Some(graph) = self.graphs.write().await.get_mut(workflow_id) {
                graph.revert_to_ready(task_id);
            }
            let _ = self
                .apply_event(
                    workflow_id,
                    WfEvent::BudgetExhausted {
                        reason: exhausted_reason(&project_id),
                    },
                )
                .await;
            return;
        }

        self.mark_agent_assigned(&agent_id).await;
        self.track_heartbeat(task_id, &agent_id, workflow_id).await;

        let cancel = CancelContext::new();
        let runner = SelfCorrectionLoop {
            agent: self.agent_client.as_ref(),
            sandbox: &self.sandbox,
            memory: &self.memory,
            scorer: QualityScorer::default(),
            worktrees_root: self.worktrees_root.clone(),
        };
        let outcome = runner
            .run(&task.workflow_id, task_id, &task.description, task.model_tier, &cancel)
            .await;

        self.untrack_heartbeat(task_id).await;
        let actual_cost = if outcome.is_ok() { ESTIMATED_TASK_COST } else { ESTIMATED_TASK_COST * 0.2 };
        let _ = self.budget.record_usage(&project_id, ESTIMATED_TASK_COST, actual_cost);

        match outcome {
            Ok(out) => {
                self.mark_agent_outcome(&agent_id, true).await;
                if let Some(graph) = self.graphs.write().await.get_mut(workflow_id) {
                    graph.complete(
                        task_id,
                        TaskResult {
                            success: true,
                            summary: format!("completed in {} attempt(s)", out.attempts),
                            cost: out.cost,
                            artifacts: out.files.iter().map(|f| f.path.clone()).collect(),
                        },
                    );
                }
            }
            Err(AuroraErrorKind::Cancelled(_)) => {
                self.mark_agent_outcome(&agent_id, false).await;
            }
            Err(err) => {
                self.mark_agent_outcome(&agent_id, false).await;
                if let Some(graph) = self.graphs.write().await.get_mut(workflow_id) {
                    graph.fail(task_id, false);
                }
                let _ = self
                    .apply_event(workflow_id, WfEvent::QualityGateFailed { reason: err.message() })
                    .await;
            }
        }
    }

    async fn mark_agent_assigned(&self, agent_id: &AgentId) {
        let mut agents = self.agents.write().await;
        if let Some(agent) = agents.iter_mut().find(|a| &a.id == agent_id) {
            agent.running_tasks += 1;
            agent.total_assignments += 1;
            agent.recent_assignments += 1;
            agent.last_assignment_index = self.assignment_counter.fetch_add(1, Ordering::SeqCst) + 1;
        }
    }

    async fn mark_agent_outcome(&self, agent_id: &AgentId, success: bool) {
        let mut agents = self.agents.write().await;
        if let Some(agent) = agents.iter_mut().find(|a| &a.id == agent_id) {
            agent.running_tasks = agent.running_tasks.saturating_sub(1);
            if success {
                agent.lifetime_successes += 1;
            } else {
                agent.lifetime_failures += 1;
            }
        }
    }

    async fn track_heartbeat(&self, task_id: &TaskId, agent_id: &AgentId, workflow_id: &str) {
        self.heartbeats.lock().await.push(Heartbeat {
            task_id: task_id.clone(),
            agent_id: agent_id.clone(),
            last_seen: Utc::now(),
        });
        self.running_task_workflow
            .lock()
            .await
            .insert(task_id.clone(), workflow_id.to_string());
    }

    async fn untrack_heartbeat(&self, task_id: &TaskId) {
        self.heartbeats.lock().await.retain(|hb| &hb.task_id != task_id);
        self.running_task_workflow.lock().await.remove(task_id);
    }

    /// Runs the health monitor's heartbeat sweep on a fixed interval (spec
    /// §4.7 Health monitor), quarantining agents and rescheduling the tasks
    /// the sweep finds stuck. Spawned once at process startup.
    pub async fn run_health_monitor_loop(self: Arc<Self>, cancel: CancelContext) {
        let heartbeats = self.heartbeats.clone();
        let monitor = HealthMonitor::new();
        let service = self.clone();
        run_heartbeat_loop(monitor, heartbeats, cancel, move |stuck| {
            let service = service.clone();
            tokio::spawn(async move { service.handle_stuck_tasks(stuck).await });
        })
        .await;
    }

    async fn handle_stuck_tasks(&self, stuck: Vec<StuckTask>) {
        let now = Utc::now();
        {
            let mut agents = self.agents.write().await;
            HealthMonitor::new().apply(&stuck, &mut agents, now);
        }

        for task in &stuck {
            let workflow_id = self.running_task_workflow.lock().await.get(&task.task_id).cloned();
            let Some(workflow_id) = workflow_id else { continue };
            let backoff = self
                .graphs
                .write()
                .await
                .get_mut(&workflow_id)
                .and_then(|g| g.fail(&task.task_id, true));
            self.untrack_heartbeat(&task.task_id).await;
            tracing::warn!(
                target: "aurora.orchestrator",
                task_id = %task.task_id,
                agent_id = %task.agent_id,
                quarantine = task.quarantine,
                rescheduled_after = ?backoff,
                "stuck task rescheduled"
            );
        }
    }

    pub async fn dashboard_stats(&self, project_id: Option<&str>, period_days: u32) -> DashboardSnapshot {
        let workflows = self.workflows.read().await;
        let filtered: Vec<&Workflow> = workflows
            .values()
            .filter(|wf| project_id.map(|p| wf.project_id.0 == p).unwrap_or(true))
            .collect();

        let total_workflows = filtered.len();
        let completed = filtered.iter().filter(|wf| wf.status == WorkflowStatus::Completed).count();
        let failed = filtered.iter().filter(|wf| wf.status == WorkflowStatus::Failed).count();
        let paused = filtered.iter().filter(|wf| wf.status == WorkflowStatus::Paused).count();
        let total_cost = filtered.iter().map(|wf| wf.actual_cost).sum();

        let graphs = self.graphs.read().await;
        let mut total_tasks = 0usize;
        let mut tasks_succeeded = 0usize;
        let mut tasks_failed = 0usize;
        let mut attempt_sum = 0u64;
        for wf in &filtered {
            if let Some(graph) = graphs.get(&wf.id.0) {
                for task in graph.tasks() {
                    total_tasks += 1;
                    attempt_sum += task.attempt_count as u64;
                    match task.status {
                        TaskStatus::Succeeded => tasks_succeeded += 1,
                        TaskStatus::Failed => tasks_failed += 1,
                        _ => {}
                    }
                }
            }
        }
        let average_attempts_per_task = if total_tasks == 0 {
            0.0
        } else {
            attempt_sum as f64 / total_tasks as f64
        };

        DashboardSnapshot {
            period_days,
            total_workflows,
            completed,
            failed,
            paused,
            total_cost,
            total_tasks,
            tasks_succeeded,
            tasks_failed,
            average_attempts_per_task,
        }
    }

    pub async fn agents_snapshot(&self) -> Vec<Agent> {
        self.agents.read().await.clone()
    }

    /// Read-only access to a workflow's task graph, for tests and
    /// diagnostics that need to inspect task-level state directly.
    pub async fn graph_snapshot(&self, workflow_id: &str) -> Option<Vec<Task>> {
        self.graphs
            .read()
            .await
            .get(workflow_id)
            .map(|g| g.tasks().cloned().collect())
    }
}

#[derive(Debug, Clone)]
pub struct DashboardSnapshot {
    pub period_days: u32,
    pub total_workflows: usize,
    pub completed: usize,
    pub failed: usize,
    pub paused: usize,
    pub total_cost: f64,
    pub total_tasks: usize,
    pub tasks_succeeded: usize,
    pub tasks_failed: usize,
    pub average_attempts_per_task: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_service() -> OrchestratorService {
        let tmp = tempdir().unwrap();
        let store = Arc::new(DurableStore::new(tmp.path()).unwrap());
        OrchestratorService::new(store, EventBus::new(), BudgetGovernor::new(1_000.0, 10_000.0))
    }

    #[tokio::test]
    async fn starting_a_workflow_moves_it_to_requirements() {
        let service = new_service();
        let wf = service
            .start_workflow("proj-1", WorkflowMode::Autonomous, "build a CRUD API".to_string())
            .await
            .unwrap();
        assert_eq!(wf.phase, Phase::Requirements);
        assert_eq!(wf.status, WorkflowStatus::Running);
    }

    #[tokio::test]
    async fn starting_a_workflow_enqueues_a_requirements_task() {
        let service = new_service();
        let wf = service
            .start_workflow("proj-1", WorkflowMode::Autonomous, "build a CRUD API".to_string())
            .await
            .unwrap();
        let tasks = service.graph_snapshot(&wf.id.0).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].role, AgentRole::Research);
    }

    #[tokio::test]
    async fn manual_pause_then_resume_round_trips() {
        let service = new_service();
        let wf = service
            .start_workflow("proj-1", WorkflowMode::Autonomous, "build a CRUD API".to_string())
            .await
            .unwrap();
        let paused = service.pause(&wf.id.0, "operator requested".to_string()).await.unwrap();
        assert_eq!(paused.status, WorkflowStatus::Paused);
        let resumed = service.resume(&wf.id.0).await.unwrap();
        assert_eq!(resumed.status, WorkflowStatus::Running);
    }

    #[tokio::test]
    async fn budget_exhaustion_pauses_affected_workflow() {
        let service = new_service();
        let wf = service
            .start_workflow("proj-1", WorkflowMode::Autonomous, "build a CRUD API".to_string())
            .await
            .unwrap();
        assert!(service.budget.can_proceed("proj-1", &AgentId::new(), 960.0));
        service.record_usage("proj-1", 960.0, 960.0).await.unwrap();
        let state = service.get_state(&wf.id.0).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Paused);
    }

    /// End-to-end happy path (spec §8 scenario 1 "happy-path autonomous"):
    /// starting a workflow and repeatedly ticking the scheduler with the
    /// default (always-succeeds) agent client drives it all the way to
    /// `completed` with no human in the loop.
    #[tokio::test]
    async fn scheduler_ticks_an_autonomous_workflow_to_completion() {
        let service = new_service();
        let wf = service
            .start_workflow("proj-1", WorkflowMode::Autonomous, "build a CRUD API".to_string())
            .await
            .unwrap();

        for _ in 0..200 {
            let state = service.get_state(&wf.id.0).await.unwrap();
            if state.status == WorkflowStatus::Completed {
                break;
            }
            service.scheduler_tick().await;
        }

        let state = service.get_state(&wf.id.0).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.phase, Phase::Completed);
    }

    /// Collaborative mode must actually stop and wait once the scheduler
    /// drives it into a breakpoint (spec §4.2 Transitions, §8 scenario 2).
    #[tokio::test]
    async fn scheduler_stops_at_collaborative_breakpoint() {
        let service = new_service();
        let wf = service
            .start_workflow("proj-1", WorkflowMode::Collaborative, "build a CRUD API".to_string())
            .await
            .unwrap();

        for _ in 0..200 {
            let state = service.get_state(&wf.id.0).await.unwrap();
            if state.status == WorkflowStatus::AwaitingApproval {
                break;
            }
            service.scheduler_tick().await;
        }

        let state = service.get_state(&wf.id.0).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::AwaitingApproval);
        assert_eq!(state.phase, Phase::Design);

        service
            .resolve_approval(&wf.id.0, true, "reviewer-1".to_string(), None, None)
            .await
            .unwrap();
        let resumed = service.get_state(&wf.id.0).await.unwrap();
        assert_eq!(resumed.status, WorkflowStatus::Running);
        assert_eq!(resumed.phase, Phase::Implementation);
    }
}
