use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use aurora_core::cancellation::CancelContext;
use aurora_memory::{MemoryManager, Reflection};
use aurora_runtime::{ExecOutcome, SandboxCommand, SandboxExecutor, SandboxPolicy};
use aurora_types::{AuroraErrorKind, ModelTier, TaskId, WorkflowId};

use crate::assignment::upgrade_tier_after_failure;

/// Maximum attempts before a task fails with `TaskExhausted` (spec §4.4
/// "Retry policy").
pub const MAX_ATTEMPTS: u32 = 5;

/// What the agent produced for one attempt (spec §4.4 step 1 "Generate").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedOutput {
    pub files: Vec<GeneratedFile>,
    pub test_command: Option<Vec<String>>,
    pub raw: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: String,
    pub contents: String,
}

/// The agent invocation boundary (spec §4.4: "a trait with no concrete
/// LLM-backed implementation in this crate — LLM API transport is out of
/// scope"). Implementations live outside this crate; only a deterministic
/// test double ships here.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn generate(
        &self,
        task_description: &str,
        context: &str,
        prior_reflections: &[Reflection],
        tier: ModelTier,
    ) -> anyhow::Result<GeneratedOutput>;

    async fn reflect(
        &self,
        task_description: &str,
        failure: &GateFailure,
    ) -> anyhow::Result<Reflection>;
}

#[derive(Debug, Clone)]
pub enum GateFailure {
    Syntax { message: String },
    Test { message: String },
    Quality { score: f64, threshold: f64 },
}

impl GateFailure {
    fn describe(&self) -> String {
        match self {
            GateFailure::Syntax { message } => format!("syntax gate failed: {message}"),
            GateFailure::Test { message } => format!("test gate failed: {message}"),
            GateFailure::Quality { score, threshold } => {
                format!("quality gate failed: {score:.2} < threshold {threshold:.2}")
            }
        }
    }
}

/// Final outcome of `run` (spec §4.4 contract).
#[derive(Debug, Clone)]
pub struct Outcome {
    pub files: Vec<GeneratedFile>,
    pub cost: f64,
    pub attempts: u32,
}

/// A deterministic composite quality score (spec §4.4 "Gate 3"): coverage,
/// cyclomatic-complexity proxy, dependency freshness. Each sub-score is
/// 0.0-1.0; the composite is their unweighted mean, configurable threshold
/// defaults to 0.7.
pub struct QualityScorer {
    pub threshold: f64,
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self { threshold: 0.7 }
    }
}

impl QualityScorer {
    /// A cheap static proxy standing in for real coverage/complexity/
    /// freshness tooling (out of this core's scope — "generating high-
    /// quality code content is the LLM's responsibility", spec §1
    /// Non-goals): non-empty files with no obvious TODO markers score near
    /// 1.0; empty or TODO-laden output scores low.
    pub fn score(&self, files: &[GeneratedFile]) -> f64 {
        if files.is_empty() {
            return 0.0;
        }
        let mut total = 0.0;
        for file in files {
            let has_content = !file.contents.trim().is_empty();
            let has_todo = file.contents.contains("TODO") || file.contents.contains("unimplemented!");
            total += match (has_content, has_todo) {
                (true, false) => 1.0,
                (true, true) => 0.5,
                (false, _) => 0.0,
            };
        }
        total / files.len() as f64
    }
}

/// Runs one attempt-evaluate-reflect cycle for a task until a quality gate
/// passes or the retry budget is exhausted (spec §4.4). Owns no graph/
/// scheduling state: the caller (the orchestrator service) drives
/// `TaskGraph::complete`/`fail` off this function's result.
pub struct SelfCorrectionLoop<'a> {
    pub agent: &'a dyn AgentClient,
    pub sandbox: &'a SandboxExecutor,
    pub memory: &'a MemoryManager,
    pub scorer: QualityScorer,
    pub worktrees_root: PathBuf,
}

impl<'a> SelfCorrectionLoop<'a> {
    /// Materializes the task-scoped working directory under a git worktree
    /// keyed by task identifier, so concurrent tasks never collide (spec
    /// §4.4 step 2 "Materialize", spec glossary "Working directory").
    pub fn worktree_dir(&self, workflow_id: &WorkflowId, task_id: &TaskId, attempt: u32) -> PathBuf {
        self.worktrees_root
            .join(workflow_id.0.clone())
            .join(format!("{}_attempt{}", task_id.0, attempt))
    }

    pub async fn run(
        &self,
        workflow_id: &WorkflowId,
        task_id: &TaskId,
        task_description: &str,
        mut tier: ModelTier,
        cancel: &CancelContext,
    ) -> Result<Outcome, AuroraErrorKind> {
        let mut reflections: Vec<Reflection> = Vec::new();
        let mut total_cost = 0.0;

        for attempt in 1..=MAX_ATTEMPTS {
            if cancel.is_cancelled() {
                return Err(AuroraErrorKind::Cancelled(format!(
                    "task {task_id} cancelled before attempt {attempt}"
                )));
            }

            let context_bundle = self
                .memory
                .get_context(task_description, Some(&workflow_id.0), 4_000)
                .await
                .map(|bundle| bundle.render())
                .unwrap_or_default();

            let generated = self
                .agent
                .generate(task_description, &context_bundle, &reflections, tier)
                .await
                .map_err(|e| AuroraErrorKind::TaskExhausted(e.to_string()))?;

            let workdir = self.worktree_dir(workflow_id, task_id, attempt);
            if let Err(e) = materialize(&workdir, &generated.files) {
                let failure = GateFailure::Syntax {
                    message: e.to_string(),
                };
                reflections.push(self.reflect_and_record(workflow_id, task_id, attempt, task_description, &failure).await?);
                continue;
            }

            if let Some(failure) = syntax_gate(&generated.files) {
                reflections.push(self.reflect_and_record(workflow_id, task_id, attempt, task_description, &failure).await?);
                continue;
            }

            if let Some(test_cmd) = &generated.test_command {
                match self.test_gate(&workdir, test_cmd).await {
                    Ok(cost) => total_cost += cost,
                    Err(failure) => {
                        reflections.push(
                            self.reflect_and_record(workflow_id, task_id, attempt, task_description, &failure)
                                .await?,
                        );
                        tier = upgrade_tier_after_failure(tier);
                        continue;
                    }
                }
            }

            let quality = self.scorer.score(&generated.files);
            if quality < self.scorer.threshold {
                let failure = GateFailure::Quality {
                    score: quality,
                    threshold: self.scorer.threshold,
                };
                reflections.push(self.reflect_and_record(workflow_id, task_id, attempt, task_description, &failure).await?);
                tier = upgrade_tier_after_failure(tier);
                continue;
            }

            return Ok(Outcome {
                files: generated.files,
                cost: total_cost,
                attempts: attempt,
            });
        }

        Err(AuroraErrorKind::TaskExhausted(format!(
            "task {task_id} exhausted {MAX_ATTEMPTS} attempts"
        )))
    }

    async fn reflect_and_record(
        &self,
        workflow_id: &WorkflowId,
        task_id: &TaskId,
        attempt: u32,
        task_description: &str,
        failure: &GateFailure,
    ) -> Result<Reflection, AuroraErrorKind> {
        let reflection = self
            .agent
            .reflect(task_description, failure)
            .await
            .map_err(|e| AuroraErrorKind::TaskExhausted(e.to_string()))?;

        self.memory
            .record_reflection(&workflow_id.0, &task_id.0, attempt, reflection.clone())
            .await
            .map_err(|e| AuroraErrorKind::TaskExhausted(e.to_string()))?;

        Ok(reflection)
    }

    async fn test_gate(&self, workdir: &PathBuf, cmd: &[String]) -> Result<f64, GateFailure> {
        let Some(program) = cmd.first() else {
            return Err(GateFailure::Test {
                message: "empty test command".to_string(),
            });
        };
        let command = SandboxCommand::new(program, cmd[1..].to_vec(), workdir.clone());
        let policy = SandboxPolicy::scoped_to(workdir.clone());
        let result = self.sandbox.run(&command, &policy).await.map_err(|e| GateFailure::Test {
            message: e.to_string(),
        })?;

        match result.outcome {
            ExecOutcome::Completed if result.succeeded() => Ok(0.0),
            ExecOutcome::TimedOut => Err(GateFailure::Test {
                message: "test run timed out".to_string(),
            }),
            _ => Err(GateFailure::Test {
                message: format!(
                    "tests failed (exit={:?}): {}",
                    result.exit_code,
                    truncate(&result.stderr, 500)
                ),
            }),
        }
    }
}

fn materialize(workdir: &PathBuf, files: &[GeneratedFile]) -> std::io::Result<()> {
    std::fs::create_dir_all(workdir)?;
    for file in files {
        let path = workdir.join(&file.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &file.contents)?;
    }
    Ok(())
}

/// Gate 1 (spec §4.4): a static lint/parse stand-in. Flags empty output and
/// obviously unbalanced braces as a syntax failure; a real implementation
/// would shell out to the target language's parser via the sandbox.
fn syntax_gate(files: &[GeneratedFile]) -> Option<GateFailure> {
    if files.is_empty() {
        return Some(GateFailure::Syntax {
            message: "no files produced".to_string(),
        });
    }
    for file in files {
        let opens = file.contents.matches('{').count();
        let closes = file.contents.matches('}').count();
        if opens != closes {
            return Some(GateFailure::Syntax {
                message: format!("{}: unbalanced braces", file.path),
            });
        }
    }
    None
}

fn truncate(input: &str, max_len: usize) -> String {
    if input.len() <= max_len {
        input.to_string()
    } else {
        format!("{}...", &input[..max_len])
    }
}

/// Production default for `AgentClient` (spec §4.4: "a trait with no
/// concrete LLM-backed implementation in this crate — LLM API transport is
/// out of scope"). Generating real code content is explicitly the LLM's
/// responsibility, not this core's, so this stands in for a real model
/// backend the same way `ContainerBackend` stands in for a real container
/// runtime: it always succeeds deterministically, keeping the graph ->
/// assignment -> self-correction -> phase-completion control flow
/// exercisable without one plugged in. Real deployments swap it out via
/// `OrchestratorService::with_agent_client`.
pub struct DefaultAgentClient;

#[async_trait]
impl AgentClient for DefaultAgentClient {
    async fn generate(
        &self,
        task_description: &str,
        _context: &str,
        _prior_reflections: &[Reflection],
        _tier: ModelTier,
    ) -> anyhow::Result<GeneratedOutput> {
        Ok(GeneratedOutput {
            files: vec![GeneratedFile {
                path: "NOTES.md".to_string(),
                contents: format!("# {task_description}\n\nHandled by the default placeholder agent client.\n"),
            }],
            test_command: None,
            raw: task_description.to_string(),
        })
    }

    async fn reflect(
        &self,
        task_description: &str,
        failure: &GateFailure,
    ) -> anyhow::Result<Reflection> {
        Ok(Reflection {
            root_cause: failure.describe(),
            incorrect_assumptions: format!("assumed \"{task_description}\" would pass on the first attempt"),
            improved_strategy: "retry with the gate failure folded into context".to_string(),
            generalizable_lesson: "inspect the gate failure before retrying".to_string(),
        })
    }
}

/// Deterministic in-process test double (spec §4.4: "only a deterministic
/// in-process test double is provided"). Fails syntax gate on the first
/// `fail_attempts` calls, then succeeds.
pub struct ScriptedAgentClient {
    pub fail_attempts: std::sync::atomic::AtomicU32,
    pub calls: std::sync::atomic::AtomicU32,
}

impl ScriptedAgentClient {
    pub fn new(fail_attempts: u32) -> Self {
        Self {
            fail_attempts: std::sync::atomic::AtomicU32::new(fail_attempts),
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl AgentClient for ScriptedAgentClient {
    async fn generate(
        &self,
        _task_description: &str,
        _context: &str,
        _prior_reflections: &[Reflection],
        _tier: ModelTier,
    ) -> anyhow::Result<GeneratedOutput> {
        let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let fail_attempts = self.fail_attempts.load(std::sync::atomic::Ordering::SeqCst);
        if call < fail_attempts {
            return Ok(GeneratedOutput {
                files: vec![GeneratedFile {
                    path: "src/lib.rs".to_string(),
                    contents: "fn broken( {".to_string(),
                }],
                test_command: None,
                raw: "broken attempt".to_string(),
            });
        }
        Ok(GeneratedOutput {
            files: vec![GeneratedFile {
                path: "src/lib.rs".to_string(),
                contents: "pub fn ok() -> i32 { 42 }".to_string(),
            }],
            test_command: None,
            raw: "final attempt".to_string(),
        })
    }

    async fn reflect(
        &self,
        _task_description: &str,
        failure: &GateFailure,
    ) -> anyhow::Result<Reflection> {
        Ok(Reflection {
            root_cause: failure.describe(),
            incorrect_assumptions: "assumed brace balance".to_string(),
            improved_strategy: "re-check generated syntax before returning".to_string(),
            generalizable_lesson: "always balance braces".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurora_core::store::DurableStore;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn succeeds_after_two_failed_syntax_attempts() {
        let tmp = tempdir().unwrap();
        let store = Arc::new(DurableStore::new(tmp.path().join("store")).unwrap());
        let memory = MemoryManager::new(store);
        memory.load().await.unwrap();
        let sandbox = SandboxExecutor::new(Arc::new(aurora_runtime::LocalProcessBackend::new()));
        let agent = ScriptedAgentClient::new(2);

        let runner = SelfCorrectionLoop {
            agent: &agent,
            sandbox: &sandbox,
            memory: &memory,
            scorer: QualityScorer::default(),
            worktrees_root: tmp.path().join("worktrees"),
        };

        let workflow_id = WorkflowId::new();
        let task_id = TaskId::new();
        let cancel = CancelContext::new();
        let outcome = runner
            .run(&workflow_id, &task_id, "implement a function", ModelTier::Standard, &cancel)
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn exhausts_after_five_persistent_failures() {
        let tmp = tempdir().unwrap();
        let store = Arc::new(DurableStore::new(tmp.path().join("store")).unwrap());
        let memory = MemoryManager::new(store);
        memory.load().await.unwrap();
        let sandbox = SandboxExecutor::new(Arc::new(aurora_runtime::LocalProcessBackend::new()));
        let agent = ScriptedAgentClient::new(999);

        let runner = SelfCorrectionLoop {
            agent: &agent,
            sandbox: &sandbox,
            memory: &memory,
            scorer: QualityScorer::default(),
            worktrees_root: tmp.path().join("worktrees"),
        };

        let workflow_id = WorkflowId::new();
        let task_id = TaskId::new();
        let cancel = CancelContext::new();
        let err = runner
            .run(&workflow_id, &task_id, "implement a function", ModelTier::Standard, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AuroraErrorKind::TaskExhausted(_)));
        assert_eq!(agent.calls.load(std::sync::atomic::Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
