use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;

use aurora_types::{AgentRole, AuroraErrorKind, TaskId, TaskStatus};

use crate::model::{Task, TaskResult};

/// Global concurrency limit (spec §4.1 `claim_next_ready`).
pub const DEFAULT_MAX_CONCURRENT: usize = 4;
/// Retry cap before cascading cancellation (spec §4.1 `fail`).
pub const DEFAULT_RETRY_CAP: u32 = 3;

/// The evolving DAG of tasks for one workflow (spec §4.1). Owns readiness
/// bookkeeping, file-path advisory locks, and the synthetic-task cycle
/// breaker; does not own agent assignment or execution.
pub struct TaskGraph {
    tasks: HashMap<TaskId, Task>,
    /// Successor adjacency, recomputed whenever an edge is added.
    successors: HashMap<TaskId, HashSet<TaskId>>,
    /// Count of not-yet-terminal predecessors, decremented by
    /// `resolve_dependency`; reaching zero flips `pending -> ready`.
    pending_dep_count: HashMap<TaskId, usize>,
    running_paths: HashSet<String>,
    running: HashSet<TaskId>,
    max_concurrent: usize,
    retry_cap: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            successors: HashMap::new(),
            pending_dep_count: HashMap::new(),
            running_paths: HashSet::new(),
            running: HashSet::new(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            retry_cap: DEFAULT_RETRY_CAP,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Inserts a task; rejects with `CycleDetected` if the induced graph has
    /// a cycle. Cycle detection walks only the new vertex's reachable set
    /// (White/Gray/Black coloring), not the whole graph (spec §4.1
    /// Algorithms).
    pub fn add_task(&mut self, mut task: Task) -> Result<TaskId, AuroraErrorKind> {
        let id = task.id.clone();
        for dep in task.all_deps() {
            if !self.tasks.contains_key(dep) {
                return Err(AuroraErrorKind::DependencyFailed(format!(
                    "task {id} declares unknown dependency {dep}"
                )));
            }
        }

        for dep in task.all_deps().cloned().collect::<Vec<_>>() {
            self.successors.entry(dep.clone()).or_default().insert(id.clone());
        }

        if let Some(path) = self.find_cycle_from(&id) {
            for dep in task.all_deps().cloned().collect::<Vec<_>>() {
                if let Some(succ) = self.successors.get_mut(&dep) {
                    succ.remove(&id);
                }
            }
            return Err(AuroraErrorKind::CycleDetected(
                path.iter().map(|t| t.0.clone()).collect::<Vec<_>>().join(" -> "),
            ));
        }

        let pending_deps = task
            .all_deps()
            .filter(|d| {
                self.tasks
                    .get(*d)
                    .map(|t| !matches!(t.status, TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled))
                    .unwrap_or(true)
            })
            .count();

        if pending_deps == 0 {
            task.status = TaskStatus::Ready;
            task.ready_at = Some(Utc::now());
        }
        self.pending_dep_count.insert(id.clone(), pending_deps);
        self.tasks.insert(id.clone(), task);
        Ok(id)
    }

    /// Inserts a synthetic architect task that breaks a live-edit cycle
    /// between `a` and `b` (spec §4.1 Deadlock prevention). The new task has
    /// no declared dependencies of its own; `a` and `b` are re-pointed to
    /// depend on it instead of on each other by the caller.
    pub fn insert_cycle_breaker(&mut self, workflow_id: aurora_types::WorkflowId, a: &TaskId, b: &TaskId) -> TaskId {
        let mut spec_task = Task::new(
            workflow_id,
            format!("Resolve conflicting edit between {a} and {b}"),
            "Synthetic specification task inserted to break a live-edit dependency cycle.".to_string(),
            AgentRole::Architect,
            5,
            512,
            Vec::new(),
            HashSet::new(),
            HashSet::new(),
        );
        spec_task.id = TaskId(format!("spec_break_{}_{}", a.0, b.0));
        spec_task.status = TaskStatus::Ready;
        spec_task.ready_at = Some(Utc::now());
        let id = spec_task.id.clone();
        self.pending_dep_count.insert(id.clone(), 0);
        self.tasks.insert(id.clone(), spec_task);
        id
    }

    fn find_cycle_from(&self, start: &TaskId) -> Option<Vec<TaskId>> {
        let mut color: HashMap<TaskId, Color> = HashMap::new();
        let mut path = Vec::new();
        self.dfs(start, &mut color, &mut path)
    }

    fn dfs(
        &self,
        node: &TaskId,
        color: &mut HashMap<TaskId, Color>,
        path: &mut Vec<TaskId>,
    ) -> Option<Vec<TaskId>> {
        color.insert(node.clone(), Color::Gray);
        path.push(node.clone());

        if let Some(succ) = self.successors.get(node) {
            for next in succ {
                match color.get(next) {
                    Some(Color::Gray) => {
                        path.push(next.clone());
                        return Some(path.clone());
                    }
                    Some(Color::Black) => continue,
                    _ => {
                        if let Some(cycle) = self.dfs(next, color, path) {
                            return Some(cycle);
                        }
                    }
                }
            }
        }

        path.pop();
        color.insert(node.clone(), Color::Black);
        None
    }

    /// Marks `dep_id` terminal; any successor whose remaining dependency
    /// count reaches zero transitions `pending -> ready` (spec §4.1).
    pub fn resolve_dependency(&mut self, dep_id: &TaskId) {
        let Some(successors) = self.successors.get(dep_id).cloned() else {
            return;
        };
        for succ_id in successors {
            if let Some(count) = self.pending_dep_count.get_mut(&succ_id) {
                if *count > 0 {
                    *count -= 1;
                }
                if *count == 0 {
                    if let Some(task) = self.tasks.get_mut(&succ_id) {
                        if task.status == TaskStatus::Pending {
                            task.status = TaskStatus::Ready;
                            task.ready_at = Some(Utc::now());
                        }
                    }
                }
            }
        }
    }

    /// Atomically picks one ready task honoring global concurrency, file
    /// disjointness, and the complexity/FIFO priority tie-break (spec §4.1
    /// `claim_next_ready`).
    pub fn claim_next_ready(&mut self) -> Option<TaskId> {
        if self.running.len() >= self.max_concurrent {
            return None;
        }

        let candidate_id = {
            let mut candidates: Vec<&Task> = self
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Ready)
                .filter(|t| !t.file_paths.iter().any(|p| self.running_paths.contains(p)))
                .collect();

            candidates.sort_by(|a, b| {
                b.complexity
                    .cmp(&a.complexity)
                    .then_with(|| a.ready_at.cmp(&b.ready_at))
            });

            candidates.first().map(|t| t.id.clone())
        };

        if let Some(id) = &candidate_id {
            if let Some(task) = self.tasks.get_mut(id) {
                task.status = TaskStatus::Running;
                self.running.insert(id.clone());
                for path in &task.file_paths {
                    self.running_paths.insert(path.clone());
                }
            }
        }
        candidate_id
    }

    /// Records result, marks task terminal, triggers `resolve_dependency`
    /// for successors, releases file locks (spec §4.1 `complete`).
    pub fn complete(&mut self, task_id: &TaskId, result: TaskResult) {
        self.release(task_id);
        if let Some(task) = self.tasks.get_mut(task_id) {
            task.status = TaskStatus::Succeeded;
            task.last_result = Some(result);
        }
        self.resolve_dependency(task_id);
    }

    /// If retriable and attempt count is under the retry cap, re-enters
    /// ready with exponential backoff (1s, 2s, 4s, jitter +/-20%);
    /// otherwise cascades cancellation to unstarted descendants (spec §4.1
    /// `fail`).
    pub fn fail(&mut self, task_id: &TaskId, retriable: bool) -> Option<Duration> {
        self.release(task_id);
        let Some(task) = self.tasks.get_mut(task_id) else {
            return None;
        };
        task.attempt_count += 1;

        if retriable && task.attempt_count < self.retry_cap {
            task.status = TaskStatus::Ready;
            task.ready_at = Some(Utc::now());
            Some(backoff_with_jitter(task.attempt_count))
        } else {
            task.status = TaskStatus::Failed;
            let descendants = self.reachable_from(task_id);
            self.cascade_cancel(&descendants);
            None
        }
    }

    /// Reverts a running task back to `ready` without consuming a retry
    /// attempt or cascading cancellation to its descendants. Used when the
    /// budget governor blocks a claimed task from actually running (spec
    /// §8: an approved workflow whose next task would exceed the budget
    /// cap "transitions directly to paused ... without running the task").
    pub fn revert_to_ready(&mut self, task_id: &TaskId) {
        self.release(task_id);
        if let Some(task) = self.tasks.get_mut(task_id) {
            task.status = TaskStatus::Ready;
            task.ready_at = Some(Utc::now());
        }
    }

    fn release(&mut self, task_id: &TaskId) {
        self.running.remove(task_id);
        if let Some(task) = self.tasks.get(task_id) {
            for path in &task.file_paths {
                self.running_paths.remove(path);
            }
        }
    }

    fn reachable_from(&self, root: &TaskId) -> Vec<TaskId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        if let Some(succ) = self.successors.get(root) {
            queue.extend(succ.iter().cloned());
        }
        let mut out = Vec::new();
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            out.push(next.clone());
            if let Some(succ) = self.successors.get(&next) {
                queue.extend(succ.iter().cloned());
            }
        }
        out
    }

    fn cascade_cancel(&mut self, descendants: &[TaskId]) {
        for id in descendants {
            if let Some(task) = self.tasks.get_mut(id) {
                if !matches!(task.status, TaskStatus::Succeeded | TaskStatus::Failed) {
                    task.status = TaskStatus::Cancelled;
                    self.running.remove(id);
                }
            }
        }
    }

    pub fn all_completed(&self) -> bool {
        !self.tasks.is_empty()
            && self
                .tasks
                .values()
                .all(|t| matches!(t.status, TaskStatus::Succeeded | TaskStatus::Cancelled))
    }

    pub fn any_failed(&self) -> bool {
        self.tasks.values().any(|t| t.status == TaskStatus::Failed)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let base_ms = 1000u64 * 2u64.pow(attempt.saturating_sub(1));
    let jitter_range = (base_ms as f64 * 0.2) as i64;
    let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
    Duration::from_millis((base_ms as i64 + jitter).max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurora_types::WorkflowId;
    use std::collections::HashSet as HS;

    fn task(workflow: &WorkflowId, title: &str, deps: Vec<TaskId>) -> Task {
        Task::new(
            workflow.clone(),
            title.to_string(),
            "desc".to_string(),
            AgentRole::Backend,
            5,
            100,
            Vec::new(),
            deps.into_iter().collect(),
            HS::new(),
        )
    }

    #[test]
    fn independent_task_is_immediately_ready() {
        let wf = WorkflowId::new();
        let mut graph = TaskGraph::new();
        let t = task(&wf, "root", vec![]);
        let id = graph.add_task(t).unwrap();
        assert_eq!(graph.get(&id).unwrap().status, TaskStatus::Ready);
    }

    #[test]
    fn dependent_task_becomes_ready_after_resolve() {
        let wf = WorkflowId::new();
        let mut graph = TaskGraph::new();
        let root = task(&wf, "root", vec![]);
        let root_id = graph.add_task(root).unwrap();

        let child = task(&wf, "child", vec![root_id.clone()]);
        let child_id = graph.add_task(child).unwrap();
        assert_eq!(graph.get(&child_id).unwrap().status, TaskStatus::Pending);

        graph.resolve_dependency(&root_id);
        assert_eq!(graph.get(&child_id).unwrap().status, TaskStatus::Ready);
    }

    #[test]
    fn adding_a_cycle_is_rejected() {
        let wf = WorkflowId::new();
        let mut graph = TaskGraph::new();
        let a = task(&wf, "a", vec![]);
        let a_id = graph.add_task(a).unwrap();
        let b = task(&wf, "b", vec![a_id.clone()]);
        let b_id = graph.add_task(b).unwrap();

        // Force a's dependency list to include b, inducing a cycle, then
        // attempt to re-add a with that edge present.
        let mut a_again = task(&wf, "a-cyclic", vec![b_id.clone()]);
        a_again.id = a_id;
        let err = graph.add_task(a_again).unwrap_err();
        assert!(matches!(err, AuroraErrorKind::CycleDetected(_)));
    }

    #[test]
    fn claim_next_ready_respects_max_concurrent() {
        let wf = WorkflowId::new();
        let mut graph = TaskGraph::new().with_max_concurrent(1);
        graph.add_task(task(&wf, "a", vec![])).unwrap();
        graph.add_task(task(&wf, "b", vec![])).unwrap();

        assert!(graph.claim_next_ready().is_some());
        assert!(graph.claim_next_ready().is_none());
    }

    #[test]
    fn claim_next_ready_prefers_higher_complexity() {
        let wf = WorkflowId::new();
        let mut graph = TaskGraph::new();
        let mut low = task(&wf, "low", vec![]);
        low.complexity = 2;
        let mut high = task(&wf, "high", vec![]);
        high.complexity = 9;
        graph.add_task(low).unwrap();
        let high_id = graph.add_task(high).unwrap();

        let claimed = graph.claim_next_ready().unwrap();
        assert_eq!(claimed, high_id);
    }

    #[test]
    fn conflicting_file_paths_are_not_claimed_together() {
        let wf = WorkflowId::new();
        let mut graph = TaskGraph::new().with_max_concurrent(4);
        let mut a = task(&wf, "a", vec![]);
        a.file_paths = vec!["src/lib.rs".to_string()];
        let mut b = task(&wf, "b", vec![]);
        b.file_paths = vec!["src/lib.rs".to_string()];
        graph.add_task(a).unwrap();
        graph.add_task(b).unwrap();

        assert!(graph.claim_next_ready().is_some());
        assert!(graph.claim_next_ready().is_none());
    }

    #[test]
    fn fail_under_retry_cap_re_enters_ready_with_backoff() {
        let wf = WorkflowId::new();
        let mut graph = TaskGraph::new();
        let id = graph.add_task(task(&wf, "a", vec![])).unwrap();
        graph.claim_next_ready();

        let backoff = graph.fail(&id, true);
        assert!(backoff.is_some());
        assert_eq!(graph.get(&id).unwrap().status, TaskStatus::Ready);
    }

    #[test]
    fn fail_past_retry_cap_cascades_cancellation() {
        let wf = WorkflowId::new();
        let mut graph = TaskGraph::new();
        let root_id = graph.add_task(task(&wf, "root", vec![])).unwrap();
        let child = task(&wf, "child", vec![root_id.clone()]);
        let child_id = graph.add_task(child).unwrap();

        for _ in 0..DEFAULT_RETRY_CAP {
            graph.claim_next_ready();
            graph.fail(&root_id, true);
        }

        assert_eq!(graph.get(&root_id).unwrap().status, TaskStatus::Failed);
        assert_eq!(graph.get(&child_id).unwrap().status, TaskStatus::Cancelled);
    }

    #[test]
    fn revert_to_ready_does_not_burn_an_attempt() {
        let wf = WorkflowId::new();
        let mut graph = TaskGraph::new();
        let id = graph.add_task(task(&wf, "a", vec![])).unwrap();
        graph.claim_next_ready();

        graph.revert_to_ready(&id);
        assert_eq!(graph.get(&id).unwrap().status, TaskStatus::Ready);
        assert_eq!(graph.get(&id).unwrap().attempt_count, 0);
        assert!(graph.claim_next_ready().is_some());
    }

    #[test]
    fn insert_cycle_breaker_produces_deterministic_id() {
        let wf = WorkflowId::new();
        let mut graph = TaskGraph::new();
        let a = TaskId("a".into());
        let b = TaskId("b".into());
        let id = graph.insert_cycle_breaker(wf, &a, &b);
        assert_eq!(id.0, "spec_break_a_b");
        assert_eq!(graph.get(&id).unwrap().role, AgentRole::Architect);
    }
}
