use chrono::Utc;
use serde_json::{json, Value};

use aurora_types::{
    ApprovalId, BreakpointId, Phase, WorkflowMode, WorkflowStatus,
};

use crate::model::{ApprovalRecord, Breakpoint, Workflow};

/// Commands the reducer asks its caller to perform after folding an event
/// (spec §4.2). The reducer itself never touches the event bus or the
/// durable store directly — its caller (the orchestrator service) does, so
/// the transition can be persisted "before being acknowledged to callers"
/// (spec §4.2 Durability).
#[derive(Debug, Clone)]
pub enum WorkflowCommand {
    /// Emit the task set for the phase just entered.
    EmitTasksForPhase { phase: Phase },
    /// Persist the snapshot and broadcast a state-change event.
    Persist,
    BroadcastApprovalRequired { breakpoint: Breakpoint },
    BroadcastTaskComplete { message: String },
    BroadcastError { message: String },
}

/// Events the workflow state machine folds (spec §4.2 Transitions /
/// Approval resolution).
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// All tasks for the current phase succeeded.
    PhaseCompleted,
    /// The self-correction loop exhausted retries, or the budget governor
    /// signalled exhaustion — both force a breakpoint regardless of mode
    /// (spec §4.2 Transitions).
    QualityGateFailed { reason: String },
    BudgetExhausted { reason: String },
    Approval(ApprovalRecord),
    ManualPause { reason: String },
    ManualResume,
    Cancel,
}

/// Keyed on `(mode, phase)`: does completing `phase` trigger a breakpoint?
/// Default breakpoints in collaborative mode fire after `design` and after
/// `security_audit` (spec §4.2 Transitions).
fn default_breakpoint_fires(mode: WorkflowMode, completed_phase: Phase) -> bool {
    match mode {
        WorkflowMode::Collaborative => {
            matches!(completed_phase, Phase::Design | Phase::SecurityAudit)
        }
        WorkflowMode::Autonomous => false,
    }
}

/// Drives one workflow's lifecycle phase-by-phase (spec §4.2). A pure
/// reducer over `(Workflow, WorkflowEvent) -> (Workflow, Vec<WorkflowCommand>)`,
/// mirroring the reference `MissionReducer` shape (`init`/`on_event`)
/// generalized to the ten-phase lifecycle and the `awaiting_approval`
/// re-entrant suspension.
pub struct WorkflowStateMachine;

impl WorkflowStateMachine {
    pub fn init(project: &crate::model::Project) -> Workflow {
        Workflow::new(project)
    }

    /// Folds one event, returning the next workflow state and the commands
    /// the caller must perform. Bumps `revision` on every state-affecting
    /// transition (spec §8 "monotonically increasing version").
    pub fn reduce(workflow: &Workflow, event: WorkflowEvent) -> (Workflow, Vec<WorkflowCommand>) {
        let mut next = workflow.clone();
        let mut commands = Vec::new();
        let mut changed = false;

        match event {
            WorkflowEvent::PhaseCompleted => {
                changed = true;
                let completed_phase = next.phase;
                let breakpoint_fires = match next.mode {
                    WorkflowMode::Collaborative => {
                        default_breakpoint_fires(next.mode, completed_phase)
                    }
                    WorkflowMode::Autonomous => false,
                };

                if let Some(next_phase) = completed_phase.next() {
                    if breakpoint_fires {
                        let bp = Breakpoint {
                            id: BreakpointId::new(),
                            checkpoint_name: format!("post_{}", phase_slug(completed_phase)),
                            reason: format!(
                                "collaborative mode breakpoint after {}",
                                phase_slug(completed_phase)
                            ),
                            context: json!({ "completed_phase": phase_slug(completed_phase) }),
                            created_at: Utc::now(),
                            requires_approval: true,
                            originating_phase: completed_phase,
                        };
                        next.breakpoint = Some(bp.clone());
                        next.status = WorkflowStatus::AwaitingApproval;
                        commands.push(WorkflowCommand::BroadcastApprovalRequired { breakpoint: bp });
                    } else {
                        next.phase = next_phase;
                        next.status = if next_phase == Phase::Completed {
                            WorkflowStatus::Completed
                        } else {
                            WorkflowStatus::Running
                        };
                        next.progress = phase_progress(next_phase);
                        if next_phase != Phase::Completed {
                            commands.push(WorkflowCommand::EmitTasksForPhase { phase: next_phase });
                        }
                        commands.push(WorkflowCommand::BroadcastTaskComplete {
                            message: format!("phase {} completed", phase_slug(completed_phase)),
                        });
                    }
                } else {
                    next.status = WorkflowStatus::Completed;
                    next.progress = 1.0;
                }
            }

            WorkflowEvent::QualityGateFailed { reason } | WorkflowEvent::BudgetExhausted { reason } => {
                changed = true;
                let is_budget = matches!(reason.as_str(), r if r.starts_with("budget_exceeded"));
                let bp = Breakpoint {
                    id: BreakpointId::new(),
                    checkpoint_name: if is_budget {
                        "budget_exceeded".to_string()
                    } else {
                        "quality_gate_failed".to_string()
                    },
                    reason: reason.clone(),
                    context: json!({ "phase": phase_slug(next.phase) }),
                    created_at: Utc::now(),
                    requires_approval: !is_budget,
                    originating_phase: next.phase,
                };
                if is_budget {
                    next.status = WorkflowStatus::Paused;
                    next.breakpoint = Some(bp);
                    commands.push(WorkflowCommand::BroadcastError { message: reason });
                } else {
                    next.status = WorkflowStatus::AwaitingApproval;
                    next.breakpoint = Some(bp.clone());
                    commands.push(WorkflowCommand::BroadcastApprovalRequired { breakpoint: bp });
                }
            }

            WorkflowEvent::Approval(record) => {
                let Some(bp) = next.breakpoint.clone() else {
                    // Approving an already-resolved breakpoint is a no-op
                    // (spec §8 "approving the same approval_id twice").
                    return (next, commands);
                };
                changed = true;
                next.breakpoint = None;
                let originating_phase = bp.originating_phase;

                if record.approved {
                    next.approval_history.push(record);
                    if let Some(next_phase) = originating_phase.next() {
                        next.phase = next_phase;
                        next.status = if next_phase == Phase::Completed {
                            WorkflowStatus::Completed
                        } else {
                            WorkflowStatus::Running
                        };
                        next.progress = phase_progress(next_phase);
                        if next_phase != Phase::Completed {
                            commands.push(WorkflowCommand::EmitTasksForPhase { phase: next_phase });
                        }
                    }
                } else {
                    // Rejected: re-enter the originating phase, reviewer
                    // comments forcing rework rather than outright failure
                    // (spec §4.2 Approval resolution).
                    next.phase = originating_phase;
                    next.status = WorkflowStatus::Running;
                    next.approval_history.push(record);
                    commands.push(WorkflowCommand::EmitTasksForPhase {
                        phase: originating_phase,
                    });
                }
            }

            WorkflowEvent::ManualPause { reason } => {
                if next.status != WorkflowStatus::Paused {
                    next.status = WorkflowStatus::Paused;
                    changed = true;
                    commands.push(WorkflowCommand::BroadcastError { message: reason });
                }
            }

            WorkflowEvent::ManualResume => {
                if matches!(next.status, WorkflowStatus::Paused) {
                    next.status = WorkflowStatus::Running;
                    changed = true;
                }
            }

            WorkflowEvent::Cancel => {
                if !matches!(
                    next.status,
                    WorkflowStatus::Completed | WorkflowStatus::Cancelled
                ) {
                    next.status = WorkflowStatus::Cancelled;
                    changed = true;
                }
            }
        }

        if changed {
            next.revision = next.revision.saturating_add(1);
            next.updated_at = Utc::now();
            commands.push(WorkflowCommand::Persist);
        }
        (next, commands)
    }

    /// Resolves a duplicate approval: returns `None` when `approval_id` was
    /// already decided (spec §8 "approving the same approval_id twice is a
    /// no-op"), `Some(&record)` with the prior decision otherwise.
    pub fn find_prior_approval<'a>(
        workflow: &'a Workflow,
        approval_id: &ApprovalId,
    ) -> Option<&'a ApprovalRecord> {
        workflow
            .approval_history
            .iter()
            .find(|r| &r.approval_id == approval_id)
    }
}

fn phase_progress(phase: Phase) -> f32 {
    let idx = Phase::SEQUENCE.iter().position(|p| *p == phase).unwrap_or(0);
    idx as f32 / (Phase::SEQUENCE.len() - 1) as f32
}

pub fn phase_slug(phase: Phase) -> &'static str {
    match phase {
        Phase::Idle => "idle",
        Phase::Requirements => "requirements",
        Phase::Design => "design",
        Phase::Implementation => "implementation",
        Phase::Testing => "testing",
        Phase::CodeReview => "code_review",
        Phase::SecurityAudit => "security_audit",
        Phase::Documentation => "documentation",
        Phase::Deployment => "deployment",
        Phase::Monitoring => "monitoring",
        Phase::Completed => "completed",
    }
}

/// Builds a context payload to attach for the agent that will retry the
/// originating phase after a rejection, carrying the reviewer's literal
/// comments (spec §8 scenario 3: "the next generated design task's context
/// bundle contains the literal string").
pub fn rework_context(record: &ApprovalRecord) -> Value {
    json!({
        "rework": true,
        "reviewer_id": record.reviewer_id,
        "comments": record.comments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurora_types::ProjectId;
    use crate::model::Project;

    fn collab_workflow() -> Workflow {
        let project = Project::new(
            ProjectId::new(),
            "todo CRUD API".to_string(),
            WorkflowMode::Collaborative,
            100.0,
        );
        let mut wf = WorkflowStateMachine::init(&project);
        wf.phase = Phase::Design;
        wf.status = WorkflowStatus::Running;
        wf
    }

    fn autonomous_workflow() -> Workflow {
        let project = Project::new(
            ProjectId::new(),
            "todo CRUD API".to_string(),
            WorkflowMode::Autonomous,
            100.0,
        );
        let mut wf = WorkflowStateMachine::init(&project);
        wf.phase = Phase::Design;
        wf.status = WorkflowStatus::Running;
        wf
    }

    #[test]
    fn collaborative_mode_breaks_after_design() {
        let wf = collab_workflow();
        let (next, commands) = WorkflowStateMachine::reduce(&wf, WorkflowEvent::PhaseCompleted);
        assert_eq!(next.status, WorkflowStatus::AwaitingApproval);
        assert!(next.breakpoint.is_some());
        assert!(commands
            .iter()
            .any(|c| matches!(c, WorkflowCommand::BroadcastApprovalRequired { .. })));
    }

    #[test]
    fn autonomous_mode_does_not_break_after_design() {
        let wf = autonomous_workflow();
        let (next, _) = WorkflowStateMachine::reduce(&wf, WorkflowEvent::PhaseCompleted);
        assert_eq!(next.phase, Phase::Implementation);
        assert_eq!(next.status, WorkflowStatus::Running);
        assert!(next.breakpoint.is_none());
    }

    #[test]
    fn rejected_approval_re_enters_originating_phase_with_comments() {
        let wf = collab_workflow();
        let (awaiting, _) = WorkflowStateMachine::reduce(&wf, WorkflowEvent::PhaseCompleted);
        let record = ApprovalRecord {
            approval_id: ApprovalId::new(),
            approved: false,
            reviewer_id: "u1".to_string(),
            comments: Some("use monolith".to_string()),
            modifications: None,
            decided_at: Utc::now(),
        };
        let (next, commands) = WorkflowStateMachine::reduce(&awaiting, WorkflowEvent::Approval(record.clone()));
        assert_eq!(next.phase, Phase::Design);
        assert_eq!(next.status, WorkflowStatus::Running);
        let ctx = rework_context(&record);
        assert_eq!(ctx["comments"], "use monolith");
        assert!(commands
            .iter()
            .any(|c| matches!(c, WorkflowCommand::EmitTasksForPhase { phase } if *phase == Phase::Design)));
    }

    #[test]
    fn approved_approval_advances_past_breakpoint() {
        let wf = collab_workflow();
        let (awaiting, _) = WorkflowStateMachine::reduce(&wf, WorkflowEvent::PhaseCompleted);
        let record = ApprovalRecord {
            approval_id: ApprovalId::new(),
            approved: true,
            reviewer_id: "u1".to_string(),
            comments: None,
            modifications: None,
            decided_at: Utc::now(),
        };
        let (next, _) = WorkflowStateMachine::reduce(&awaiting, WorkflowEvent::Approval(record));
        assert_eq!(next.phase, Phase::Implementation);
        assert_eq!(next.status, WorkflowStatus::Running);
    }

    #[test]
    fn budget_exhaustion_pauses_without_breakpoint_approval_requirement() {
        let wf = autonomous_workflow();
        let (next, commands) = WorkflowStateMachine::reduce(
            &wf,
            WorkflowEvent::BudgetExhausted {
                reason: "budget_exceeded: daily cap reached".to_string(),
            },
        );
        assert_eq!(next.status, WorkflowStatus::Paused);
        assert!(commands
            .iter()
            .any(|c| matches!(c, WorkflowCommand::BroadcastError { .. })));
    }

    #[test]
    fn duplicate_approval_id_is_a_no_op() {
        let wf = collab_workflow();
        let (awaiting, _) = WorkflowStateMachine::reduce(&wf, WorkflowEvent::PhaseCompleted);
        let record = ApprovalRecord {
            approval_id: ApprovalId::new(),
            approved: true,
            reviewer_id: "u1".to_string(),
            comments: None,
            modifications: None,
            decided_at: Utc::now(),
        };
        let (next, _) = WorkflowStateMachine::reduce(&awaiting, WorkflowEvent::Approval(record.clone()));
        assert!(WorkflowStateMachine::find_prior_approval(&next, &record.approval_id).is_some());
    }
}
